mod common;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use nyx_extras::llm::Role;
use nyx_extras::{ChatModel, Message, NyxAgent};
use nyx_fake_exchange::FakeExchange;
use tempdir::TempDir;

type Transcript = Rc<RefCell<Vec<Vec<Message>>>>;

/// Replies with canned answers and records every conversation it sees.
struct ScriptedModel {
    replies: RefCell<VecDeque<&'static str>>,
    seen: Transcript,
}

impl ScriptedModel {
    fn new(replies: &[&'static str]) -> (Box<Self>, Transcript) {
        let seen = Transcript::default();
        let model = Self {
            replies: RefCell::new(replies.iter().copied().collect()),
            seen: seen.clone(),
        };
        (Box::new(model), seen)
    }
}

#[async_trait(?Send)]
impl ChatModel for ScriptedModel {
    async fn chat(&self, messages: &[Message]) -> Result<String> {
        self.seen.borrow_mut().push(messages.to_vec());
        self.replies
            .borrow_mut()
            .pop_front()
            .map(String::from)
            .ok_or_else(|| anyhow!("script exhausted"))
    }
}

#[tokio::test]
async fn test_answers_from_subscribed_data() {
    let exchange = FakeExchange::start().await;
    let client = common::connect(&exchange).await;
    common::subscribed_catalogue(&exchange, &client).await;

    let (model, seen) = ScriptedModel::new(&[
        "DELETE FROM uk_rainfall_2023",
        "```sql\nSELECT month, rain__mm_ FROM uk_rainfall_2023 ORDER BY rain__mm_ DESC LIMIT 1;\n```",
        "January was the wettest month.\n- Sources: UK Rainfall 2023",
    ]);
    let agent = NyxAgent::new(client, model);

    let dir = TempDir::new("nyx-agent").unwrap();
    let file = dir.path().join("agent.sqlite");
    let answer = agent
        .query("Which month was wettest?", None, false, Some(&file))
        .await
        .unwrap();
    assert_eq!(answer, "January was the wettest month.\n- Sources: UK Rainfall 2023");
    assert!(!file.exists());

    let seen = seen.borrow();
    assert_eq!(seen.len(), 3);

    // the rejected statement is fed back before the retry
    let retry = &seen[1];
    assert_eq!(retry.len(), 4);
    assert_eq!(retry[2], Message::assistant("DELETE FROM uk_rainfall_2023"));
    assert_eq!(retry[3].role, Role::User);
    assert!(retry[3].content.contains("only SELECT queries are allowed"));
    assert!(retry[0].content.contains("CREATE TABLE \"uk_rainfall_2023\""));

    let final_turn = &seen[2];
    assert!(final_turn[0].content.contains("nyx_subscriptions"));
    assert!(final_turn[1].content.starts_with("Which month was wettest?"));
    assert!(final_turn[1].content.contains(r#"{"month":"jan","rain__mm_":80.5}"#));
}

#[tokio::test]
async fn test_answers_directly_without_tables() {
    let exchange = FakeExchange::start().await;
    let client = common::connect(&exchange).await;

    let (model, seen) = ScriptedModel::new(&["I don't know"]);
    let agent = NyxAgent::new(client, model).with_system_prompt("Be terse.");

    let answer = agent.query("What is the rainfall?", None, true, None).await.unwrap();
    assert_eq!(answer, "I don't know");

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert!(seen[0][0].content.starts_with("Be terse. "));
    assert_eq!(seen[0][1], Message::user("What is the rainfall?"));
}

#[tokio::test]
async fn test_gives_up_after_repeated_bad_queries() {
    let exchange = FakeExchange::start().await;
    let client = common::connect(&exchange).await;
    let data = common::subscribed_catalogue(&exchange, &client).await;

    let (model, seen) = ScriptedModel::new(&[
        "SELECT * FROM missing_table",
        "DROP TABLE cities",
        "SELECT nothing FROM cities",
    ]);
    let agent = NyxAgent::new(client, model);

    let err = agent
        .query("How many people live in York?", Some(data), false, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no usable query after 3 attempts"));
    assert_eq!(seen.borrow().len(), 3);
}
