mod common;

use docmodel::{config, prelude::*, sequence};

#[derive(Debug, Clone, Default, PartialEq, Schema)]
#[model(collection = "sequence_tickets")]
struct Ticket {
    id: Option<ObjectId>,
    #[field(sequence = "ticket_numbers")]
    number: Option<i64>,
    title: Option<String>,
}

#[async_trait]
impl Model for Ticket {}

#[derive(Debug, Clone, Default, PartialEq, Schema)]
#[model(collection = "sequence_orders")]
struct Order {
    id: Option<ObjectId>,
    #[field(sequence = "order_numbers")]
    number: Option<i64>,
}

#[async_trait]
impl Model for Order {}

#[tokio::test]
async fn sequence_fields_count_up_from_one() {
    common::setup();

    let mut numbers = Vec::new();
    for title in ["first", "second", "third"] {
        let ticket = Ticket::create(doc! { "title": title }).await.unwrap();
        numbers.push(ticket.number.unwrap());
    }
    assert_eq!(numbers, vec![1, 2, 3]);

    // explicit values and updates leave the counter alone
    let explicit = Ticket::create(doc! { "title": "manual", "number": 100 }).await.unwrap();
    assert_eq!(explicit.number, Some(100));

    let mut ticket = Ticket::find_one(doc! { "title": "first" }).await.unwrap().unwrap();
    ticket.title = Some("renamed".into());
    ticket.save().await.unwrap();
    assert_eq!(ticket.number, Some(1));

    let next = Ticket::create(doc! { "title": "fourth" }).await.unwrap();
    assert_eq!(next.number, Some(4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_saves_draw_distinct_values() {
    common::setup();

    let handles: Vec<_> = (0..20)
        .map(|_| tokio::spawn(async { Order::create(doc! {}).await }))
        .collect();

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap().unwrap().number.unwrap());
    }
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=20).collect::<Vec<_>>());
}

#[tokio::test]
async fn counters_can_be_advanced_directly() {
    common::setup();

    let endpoint = config::default_endpoint();
    assert_eq!(sequence::next_value_at(&endpoint, "direct_counter").await.unwrap(), 1);
    assert_eq!(sequence::next_value_at(&endpoint, "direct_counter").await.unwrap(), 2);
    assert_eq!(sequence::next_value_at(&endpoint, "other_counter").await.unwrap(), 1);

    // counters are scoped per database
    let elsewhere = endpoint.with_database("sequence_elsewhere");
    assert_eq!(sequence::next_value_at(&elsewhere, "direct_counter").await.unwrap(), 1);
}
