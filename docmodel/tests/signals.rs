mod common;

use std::sync::{Arc, Mutex};

use docmodel::prelude::*;

macro_rules! signal_model {
    ($name:ident, $collection:literal) => {
        #[derive(Debug, Clone, Default, PartialEq, Schema)]
        #[model(collection = $collection)]
        struct $name {
            id: Option<ObjectId>,
            title: Option<String>,
        }

        #[async_trait]
        impl Model for $name {}
    };
}

static HOOKED_LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

#[derive(Debug, Clone, Default, PartialEq, Schema)]
#[model(collection = "signals_hooked")]
struct Hooked {
    id: Option<ObjectId>,
    title: Option<String>,
}

#[async_trait]
impl Model for Hooked {
    async fn on_created(&mut self) -> DocumentStoreResult<()> {
        HOOKED_LOG.lock().unwrap().push("on_created");
        Ok(())
    }
}

signal_model!(Tracked, "signals_tracked");
signal_model!(Guarded, "signals_guarded");
signal_model!(Observed, "signals_observed");

const ALL: [Signal; 7] = [
    Signal::PreCreate,
    Signal::PostCreate,
    Signal::PreUpdate,
    Signal::PostUpdate,
    Signal::WillErase,
    Signal::Recycled,
    Signal::Revived,
];

#[tokio::test]
async fn lifecycle_fires_signals_in_order() {
    common::setup();

    let fired = Arc::new(Mutex::new(Vec::new()));
    for signal in ALL {
        let fired = fired.clone();
        signals().connect(signal, Sender::model::<Tracked>(), move |event| {
            fired.lock().unwrap().push(event.signal);
            Ok(())
        });
    }

    let mut tracked = Tracked::create(doc! { "title": "one" }).await.unwrap();
    tracked.title = Some("two".into());
    tracked.save().await.unwrap();
    tracked.recycle().await.unwrap();
    Tracked::revive(tracked.id().unwrap()).await.unwrap().unwrap();
    Tracked::get(tracked.id().unwrap()).await.unwrap().unwrap().erase().await.unwrap();

    assert_eq!(
        *fired.lock().unwrap(),
        vec![
            Signal::PreCreate,
            Signal::PostCreate,
            Signal::PreUpdate,
            Signal::PostUpdate,
            Signal::Recycled,
            Signal::WillErase,
            Signal::Revived,
            Signal::WillErase,
        ]
    );
}

#[tokio::test]
async fn creation_hooks_run_once_after_the_signals() {
    common::setup();

    let logged = [
        (Signal::PreCreate, "pre_create"),
        (Signal::PostCreate, "post_create"),
        (Signal::PreUpdate, "pre_update"),
        (Signal::PostUpdate, "post_update"),
    ];
    for (signal, name) in logged {
        signals().connect(signal, Sender::model::<Hooked>(), move |_| {
            HOOKED_LOG.lock().unwrap().push(name);
            Ok(())
        });
    }

    let mut hooked = Hooked::create(doc! { "title": "first" }).await.unwrap();
    assert_eq!(*HOOKED_LOG.lock().unwrap(), ["pre_create", "post_create", "on_created"]);

    hooked.title = Some("second".into());
    hooked.save().await.unwrap();
    assert_eq!(
        *HOOKED_LOG.lock().unwrap(),
        ["pre_create", "post_create", "on_created", "pre_update", "post_update"]
    );
}

#[tokio::test]
async fn failing_handlers_abort_the_operation() {
    common::setup();

    let slot = signals().connect(Signal::PreCreate, Sender::model::<Guarded>(), |event| {
        match event.instance::<Guarded>().and_then(|guarded| guarded.title.as_deref()) {
            Some("forbidden") => Err(DocumentStoreError::Signal("title is forbidden".into())),
            _ => Ok(()),
        }
    });

    assert!(matches!(
        Guarded::create(doc! { "title": "forbidden" }).await,
        Err(DocumentStoreError::Signal(_))
    ));
    assert_eq!(Guarded::count().await.unwrap(), 0);

    Guarded::create(doc! { "title": "fine" }).await.unwrap();
    assert!(signals().disconnect(Signal::PreCreate, Sender::model::<Guarded>(), slot));
    Guarded::create(doc! { "title": "forbidden" }).await.unwrap();
    assert_eq!(Guarded::count().await.unwrap(), 2);
}

#[tokio::test]
async fn events_describe_the_instance() {
    common::setup();

    let seen = Arc::new(Mutex::new(Vec::new()));
    for signal in [Signal::PreCreate, Signal::PostCreate] {
        let seen = seen.clone();
        signals().connect(signal, Sender::model::<Observed>(), move |event| {
            let title = event.instance::<Observed>().and_then(|observed| observed.title.clone());
            seen.lock().unwrap().push((event.collection.to_string(), event.id.is_some(), title));
            Ok(())
        });
    }

    // handlers on the root channel do not hear model events
    let root = Arc::new(Mutex::new(0));
    let root_count = root.clone();
    signals().connect(Signal::PreCreate, Sender::Root, move |_| {
        *root_count.lock().unwrap() += 1;
        Ok(())
    });

    Observed::create(doc! { "title": "watched" }).await.unwrap();

    let collection = "signals_observed".to_string();
    let title = Some("watched".to_string());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(collection.clone(), false, title.clone()), (collection, true, title)]
    );
    assert_eq!(*root.lock().unwrap(), 0);
}
