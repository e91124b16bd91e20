//! Comment Feed Demo
//!
//! Two actions maintain an in-memory comment list, and an interceptor guards
//! the "add" action, deliberately calling `resume()` twice to show that the
//! second decision is ignored.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tollgate::{ActionRegistration, Dispatcher};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("tollgate=trace")
        .init();

    let dispatcher = Dispatcher::new();
    let comments: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let feed = Arc::clone(&comments);
    dispatcher.register(
        "comments.add_more_comments",
        ActionRegistration::callback(move |ctx| {
            let feed = Arc::clone(&feed);
            async move {
                let text = ctx.params.as_str().unwrap_or("Lorem ipsum dolor sit amet").to_owned();
                feed.lock().push(text);
                Ok(json!(feed.lock().len()))
            }
        }),
    );

    let feed = Arc::clone(&comments);
    dispatcher.register(
        "comments.clear_comments",
        ActionRegistration::callback(move |_ctx| {
            let feed = Arc::clone(&feed);
            async move {
                feed.lock().clear();
                Ok(json!(0))
            }
        }),
    );

    dispatcher.intercept(
        "comments.add_more_comments",
        |ctx| async move {
            println!("guard: deliberating over `{}`...", ctx.action_name());
            tokio::time::sleep(Duration::from_millis(500)).await;
            ctx.resume();
            ctx.resume(); // intentional second call to prove nothing odd happens
        },
        false,
    );

    let count = dispatcher
        .call("comments.add_more_comments", json!("first!"))
        .await?;
    println!("comments after add: {count}");

    let count = dispatcher
        .call("comments.add_more_comments", json!("second!"))
        .await?;
    println!("comments after add: {count}");

    let count = dispatcher.call("comments.clear_comments", json!(null)).await?;
    println!("comments after clear: {count}");

    Ok(())
}
