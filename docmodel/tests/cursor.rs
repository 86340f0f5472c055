mod common;

use futures::TryStreamExt;

use docmodel::prelude::*;

#[derive(Debug, Clone, Default, PartialEq, Schema)]
#[model(collection = "cursor_usertags")]
struct UserTag {
    id: Option<ObjectId>,
    user: Option<String>,
    tag: Option<String>,
    #[field(key = "n")]
    count: Option<i64>,
}

#[async_trait]
impl Model for UserTag {}

macro_rules! entry_model {
    ($name:ident, $collection:literal) => {
        #[derive(Debug, Clone, Default, PartialEq, Schema)]
        #[model(collection = $collection)]
        struct $name {
            id: Option<ObjectId>,
            position: Option<i64>,
        }

        #[async_trait]
        impl Model for $name {}
    };
}

#[derive(Debug, Clone, Default, PartialEq, Schema)]
#[model(collection = "cursor_chained")]
struct ChainedTag {
    id: Option<ObjectId>,
    user: Option<String>,
    tag: Option<String>,
}

#[async_trait]
impl Model for ChainedTag {}

entry_model!(IndexedEntry, "cursor_indexed");
entry_model!(PagedEntry, "cursor_paged");
entry_model!(SlicedEntry, "cursor_sliced");

async fn seed_tags() {
    let tags = [
        ("Jack", "Hacking", 3),
        ("Jack", "Food", 1),
        ("Jill", "Hacking", 5),
        ("Jill", "Food", 2),
        ("Jill", "Misc", 4),
        ("Bob", "Hacking", 0),
    ];
    for (user, tag, count) in tags {
        UserTag::create(doc! { "user": user, "tag": tag, "count": count }).await.unwrap();
    }
}

async fn seed_entries<M: ModelExt>() {
    for position in 0..25_i64 {
        M::create(doc! { "position": position }).await.unwrap();
    }
}

fn positions(entries: &[SlicedEntry]) -> Vec<i64> {
    entries.iter().filter_map(|entry| entry.position).collect()
}

#[tokio::test]
async fn filters_sorts_and_counts() {
    common::setup();
    seed_tags().await;

    assert_eq!(UserTag::find(doc! { "user": "Jack" }).count().await.unwrap(), 2);

    let jill = UserTag::find(doc! { "user": "Jill" }).sort("-count").fetch().await.unwrap();
    let counts: Vec<_> = jill.iter().filter_map(|tag| tag.count).collect();
    assert_eq!(counts, vec![5, 4, 2]);

    // attribute names are rewritten to storage keys
    let cursor = UserTag::find(Conditions::new().gt("count", 1));
    assert_eq!(cursor.conditions(), &doc! { "n": { "$gt": 1 } });

    let narrowed = cursor.find(Conditions::new().lt("count", 5));
    assert_eq!(narrowed.conditions(), &doc! { "n": { "$gt": 1, "$lt": 5 } });
    assert_eq!(narrowed.count().await.unwrap(), 3);
    assert_eq!(cursor.count().await.unwrap(), 4);

    let hacking = UserTag::find(doc! { "tag": "Hacking" })
        .sort("user")
        .sort("-count")
        .fetch()
        .await
        .unwrap();
    let users: Vec<_> = hacking.iter().filter_map(|tag| tag.user.as_deref()).collect();
    assert_eq!(users, vec!["Bob", "Jack", "Jill"]);
}

#[tokio::test]
async fn filters_apply_after_sorting() {
    common::setup();

    let first = ChainedTag::create(doc! { "user": "Jack", "tag": "Hacking" }).await.unwrap();
    ChainedTag::create(doc! { "user": "Jack", "tag": "Food" }).await.unwrap();
    ChainedTag::create(doc! { "user": "Jill", "tag": "Hacking" }).await.unwrap();

    let jack = ChainedTag::find(doc! { "user": "Jack" }).sort("tag");
    let sorted: Vec<_> = jack.fetch().await.unwrap().into_iter().filter_map(|tag| tag.tag).collect();
    assert_eq!(sorted, vec!["Food", "Hacking"]);

    let hacking = jack.find(doc! { "tag": "Hacking" }).fetch().await.unwrap();
    assert_eq!(hacking, vec![first]);

    // the receiver is untouched
    assert_eq!(jack.count().await.unwrap(), 2);
}

#[tokio::test]
async fn repeated_sort_keys_replace_their_direction() {
    common::setup();

    let cursor = UserTag::all().sort("user").sort("-count").sort("-user");
    assert_eq!(cursor.orders(), &[Sort::desc("user"), Sort::desc("n")]);
}

#[tokio::test]
async fn indexing_and_emptiness() {
    common::setup();
    seed_entries::<IndexedEntry>().await;

    let ordered = IndexedEntry::all().sort("position");
    assert_eq!(ordered.first().await.unwrap().unwrap().position, Some(0));
    assert_eq!(ordered.at(7).await.unwrap().unwrap().position, Some(7));
    assert!(ordered.at(25).await.unwrap().is_none());
    assert_eq!(ordered.skip(5).at(2).await.unwrap().unwrap().position, Some(7));
    assert!(ordered.limit(3).at(3).await.unwrap().is_none());

    assert!(IndexedEntry::find(doc! { "position": 99 }).is_empty().await.unwrap());
    assert!(!ordered.is_empty().await.unwrap());
}

#[tokio::test]
async fn windows_and_pages() {
    common::setup();
    seed_entries::<PagedEntry>().await;

    let ordered = PagedEntry::all().sort("position");

    let page = ordered.page(1, 10).await.unwrap();
    let first: Vec<_> = page.items.iter().filter_map(|entry| entry.position).collect();
    assert_eq!(first, (0..10).collect::<Vec<_>>());
    assert_eq!(page.count, 25);
    assert_eq!(page.next_page, Some(2));
    assert_eq!(page.previous_page, None);

    let last = ordered.page(3, 10).await.unwrap();
    assert_eq!(last.items.len(), 5);
    assert_eq!(last.next_page, None);
    assert_eq!(last.previous_page, Some(2));

    let second: Vec<_> = ordered
        .paginate(2, 10)
        .fetch()
        .await
        .unwrap()
        .into_iter()
        .filter_map(|entry| entry.position)
        .collect();
    assert_eq!(second, (10..20).collect::<Vec<_>>());

    assert!(ordered.limit(0).fetch().await.unwrap().is_empty());
    assert_eq!(ordered.skip(20).limit(10).fetch().await.unwrap().len(), 5);
    assert_eq!(ordered.skip(20).count().await.unwrap(), 25);
}

#[tokio::test]
async fn slices_select_positions() {
    common::setup();
    seed_entries::<SlicedEntry>().await;

    let ordered = SlicedEntry::all().sort("-position");
    let sliced = ordered.slice(5, 8).fetch().await.unwrap();
    assert_eq!(positions(&sliced), vec![19, 18, 17]);

    // slices are relative to the current window
    let nested = ordered.slice(5, 8).slice(1, 5).fetch().await.unwrap();
    assert_eq!(positions(&nested), vec![18, 17]);

    let streamed: Vec<SlicedEntry> = ordered.limit(2).stream().try_collect().await.unwrap();
    assert_eq!(positions(&streamed), vec![24, 23]);
}
