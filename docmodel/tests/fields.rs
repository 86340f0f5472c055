mod common;

use std::collections::BTreeMap;

use docmodel::{field::FieldKind, prelude::*};

#[derive(Debug, Clone, Default, PartialEq, Schema)]
struct Comment {
    author: Option<String>,
    body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Schema)]
#[model(collection = "fields_articles")]
struct Article {
    id: Option<ObjectId>,
    #[field(key = "t")]
    title: Option<String>,
    published: Option<bool>,
    #[field(default = 10)]
    rating: Option<i64>,
    views: Option<i64>,
    score: Option<f64>,
    comments: Vec<Comment>,
    featured: Option<Comment>,
    counters: BTreeMap<String, i64>,
    #[field(auto_now_on_create)]
    created: Option<DateTime<Utc>>,
    #[field(auto_now)]
    updated: Option<DateTime<Utc>>,
    #[field(skip)]
    scratch: Option<String>,
}

#[async_trait]
impl Model for Article {}

#[derive(Debug, Clone, Default, PartialEq, Schema)]
#[model(collection = "fields_nodes")]
struct Node {
    id: Option<ObjectId>,
    name: Option<String>,
    parent: Reference<Node>,
}

#[async_trait]
impl Model for Node {}

#[derive(Debug, Clone, Default, PartialEq, Schema)]
#[model(collection = "fields_attachments")]
struct Attachment {
    id: Option<ObjectId>,
    name: Option<String>,
    data: FileBlob,
}

#[async_trait]
impl Model for Attachment {}

#[test]
fn schema_reflects_declarations() {
    let schema = Article::schema();
    assert_eq!(schema.collection_name(), "fields_articles");
    assert_eq!(Comment::schema().collection_name(), "comment");

    let names: Vec<_> = schema.fields().iter().map(|field| field.name()).collect();
    assert_eq!(
        names,
        vec![
            "id", "title", "published", "rating", "views", "score", "comments", "featured",
            "counters", "created", "updated",
        ]
    );

    assert_eq!(schema.identifier().map(|field| field.key()), Some("_id"));
    assert_eq!(schema.storage_key("title"), "t");
    assert_eq!(schema.require("comments").unwrap().kind(), FieldKind::EmbeddedList);
    assert_eq!(schema.require("featured").unwrap().kind(), FieldKind::Embedded);
    assert_eq!(schema.require("counters").unwrap().kind(), FieldKind::Map);
    assert_eq!(Node::schema().require("parent").unwrap().kind(), FieldKind::Reference);
    assert_eq!(Attachment::schema().require("data").unwrap().kind(), FieldKind::FileBlob);
}

#[test]
fn unset_fields_report_defaults() {
    let article = Article::default();
    assert_eq!(article.get_field("published").unwrap(), Bson::Boolean(false));
    assert_eq!(article.get_field("views").unwrap(), Bson::Int64(0));
    assert_eq!(article.get_field("rating").unwrap(), Bson::Int64(10));
    assert_eq!(article.get_field("score").unwrap(), Bson::Null);
    assert_eq!(article.get_field("comments").unwrap(), Bson::Array(vec![]));
    assert_eq!(article.get_dict(), doc! { "comments": [], "counters": {} });
}

#[test]
fn assignments_are_coerced() {
    let mut article = Article::with(doc! { "title": "Coercion", "views": 3, "score": 4 }).unwrap();
    assert_eq!(article.views, Some(3));
    assert_eq!(article.score, Some(4.0));
    assert_eq!(article.get_dict().get_str("t").unwrap(), "Coercion");

    assert!(matches!(
        article.set_field("views", Bson::String("many".into())),
        Err(DocumentStoreError::TypeCoercion { .. })
    ));
    assert!(matches!(
        Article::with(doc! { "comments": "not a list" }),
        Err(DocumentStoreError::TypeCoercion { .. })
    ));
    assert!(matches!(
        article.set_field("id", Bson::String("xyz".into())),
        Err(DocumentStoreError::InvalidIdentifier(_))
    ));

    // assigning null leaves the field as it was
    article.set_field("views", Bson::Null).unwrap();
    assert_eq!(article.views, Some(3));
}

#[tokio::test]
async fn embedded_models_and_maps_round_trip() {
    common::setup();

    let mut article = Article::with(doc! { "title": "Embedded" }).unwrap();
    article.comments.push(Comment { author: Some("jack".into()), body: Some("first".into()) });
    article.featured = Some(Comment { author: Some("jill".into()), body: None });
    article.counters.insert("likes".into(), 7);
    article.scratch = Some("not persisted".into());
    article.save().await.unwrap();

    let stored = Article::connection()
        .await
        .unwrap()
        .find_one(&Article::namespace(), doc! { "_id": article.id() })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_array("comments").unwrap().len(), 1);
    assert_eq!(stored.get_document("featured").unwrap(), &doc! { "author": "jill" });
    assert!(stored.get("scratch").is_none());

    docmodel::cache::evict::<Article>(&article.id().unwrap());
    let loaded = Article::get(article.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(loaded.comments, article.comments);
    assert_eq!(loaded.featured, article.featured);
    assert_eq!(loaded.counters.get("likes"), Some(&7));
    assert_eq!(loaded.scratch, None);

    let found = Article::find(doc! { "title": "Embedded" }).first().await.unwrap();
    assert_eq!(found.map(|article| article.id()), Some(article.id()));
}

#[tokio::test]
async fn timestamps_are_stamped_on_save() {
    common::setup();

    let mut article = Article::create(doc! { "title": "Stamped" }).await.unwrap();
    let created = article.created.unwrap();
    let updated = article.updated.unwrap();
    assert!(created <= Utc::now());

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    article.views = Some(1);
    article.save().await.unwrap();

    assert_eq!(article.created, Some(created));
    assert!(article.updated.unwrap() > updated);
}

#[tokio::test]
async fn references_resolve_to_their_target() {
    common::setup();

    let root = Node::create(doc! { "name": "root" }).await.unwrap();
    let mut child = Node::with(doc! { "name": "child" }).unwrap();
    assert_eq!(child.parent.fetch().await.unwrap(), Resolved::Unset);

    child.parent.set(&root);
    child.save().await.unwrap();

    let loaded = Node::find_one(doc! { "name": "child" }).await.unwrap().unwrap();
    assert_eq!(loaded.parent.id(), root.id());
    assert_eq!(loaded.parent.fetch().await.unwrap().found(), Some(root.clone()));

    let children = Node::find(Conditions::new().instance("parent", &root)).count().await.unwrap();
    assert_eq!(children, 1);

    root.erase().await.unwrap();
    assert_eq!(loaded.parent.fetch().await.unwrap(), Resolved::Missing);
}

#[tokio::test]
async fn file_blobs_are_written_on_save() {
    common::setup();

    let mut attachment = Attachment::with(doc! { "name": "notes.txt" }).unwrap();
    assert_eq!(attachment.read_blob("data").await.unwrap(), None);

    attachment.data.write(b"hello".to_vec());
    assert!(attachment.data.is_dirty());
    attachment.save().await.unwrap();
    assert!(!attachment.data.is_dirty());
    let first = attachment.data.id().unwrap();
    assert_eq!(attachment.read_blob("data").await.unwrap(), Some(b"hello".to_vec()));

    attachment.data.write("goodbye");
    attachment.save().await.unwrap();
    assert_ne!(attachment.data.id(), Some(first));
    assert_eq!(attachment.read_blob("data").await.unwrap(), Some(b"goodbye".to_vec()));

    let blobs = Attachment::connection()
        .await
        .unwrap()
        .blobs(&Attachment::namespace().database)
        .await
        .unwrap();
    assert_eq!(blobs.get(&first).await.unwrap(), None);

    assert!(matches!(
        attachment.read_blob("name").await,
        Err(DocumentStoreError::InvalidDocument(_))
    ));
}
