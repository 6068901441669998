//! Scripted crawl demo - a full session over an in-memory site

use std::sync::Arc;
use std::time::Duration;

use adapters::fixture::{simple_result, PageFixture, ResultFixture, SiteFixture};
use adapters::ScriptedAdapter;
use orchestrator::{CrawlSession, MemoryStore, SessionNotice, SessionSettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Two keywords, two listing pages each, one slow landing page thrown in
    let fixture = SiteFixture::new()
        .keyword(
            "rust async runtime",
            vec![
                PageFixture::new(vec![
                    simple_result("https://site.example/rust/1", "Intro to async"),
                    simple_result("https://site.example/rust/2", "Runtime comparison"),
                ]),
                PageFixture::new(vec![simple_result(
                    "https://site.example/rust/3",
                    "Executor internals",
                )]),
            ],
        )
        .keyword(
            "browser automation",
            vec![PageFixture::new(vec![
                simple_result("https://site.example/auto/1", "Driving a page"),
                ResultFixture::hanging(
                    "https://site.example/auto/2",
                    "Very slow page",
                    Duration::from_secs(30),
                ),
            ])],
        );

    let adapter = Arc::new(ScriptedAdapter::new(fixture));
    let session = CrawlSession::new(Arc::new(MemoryStore::new()), adapter.clone());

    // Subscribe to notices before starting
    let mut notices = session.subscribe();
    let observer = tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            match &notice {
                SessionNotice::Completed {
                    processed,
                    extracted,
                } => {
                    println!("✅ Done: {processed} links visited, {extracted} records");
                    break;
                }
                other => println!("📢 {other:?}"),
            }
        }
    });

    let task_id = session
        .start_with(
            vec![
                "rust async runtime".to_string(),
                "browser automation".to_string(),
            ],
            SessionSettings {
                landing_page_timeout_ms: 2_000,
                ..SessionSettings::default()
            },
        )
        .await?;
    println!("🚀 Session started: {task_id}");

    observer.await?;

    if let Some(state) = session.state().await {
        println!(
            "📊 Final state: {:?}, {} processed, {} extracted",
            state.status, state.processed_links_count, state.extracted_info_count
        );
    }
    println!("📜 Adapter journal:");
    for entry in adapter.journal().await {
        println!("   {entry}");
    }

    session.destroy().await;
    Ok(())
}
