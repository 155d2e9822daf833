//! End-to-end example: ingest a few text files, wait for extraction and
//! indexing, then run some searches.
//!
//! Run with `RUST_LOG=quarry=debug` to watch the queues work.

use std::time::Duration;

use quarry::*;
use tracing_subscriber::EnvFilter;

const FILES: [(&str, &str); 4] = [
    ("invoice-march.txt", "Invoice 1042 for harbor storage, due end of March"),
    ("packing-list.txt", "Tent, stove, headlamp, two water filters"),
    ("minutes.txt", "Board minutes: approved the harbor dredging invoice"),
    ("recipe.txt", "Mix flour and sugar, bake for forty minutes"),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quarry=info")),
        )
        .init();

    let workdir = tempfile::tempdir()?;
    let mut config = ServiceConfig::default();
    config.store.snapshot_path = Some(workdir.path().join("files.json"));
    config.shutdown_grace_ms = 1_000;

    let ctx = AppContext::builder(config).start().await?;

    let mut index_events = ctx.events().subscribe_index();
    tokio::spawn(async move {
        while let Ok(event) = index_events.recv().await {
            if let IndexEvent::Rebuilt {
                generation,
                documents,
                duration,
                ..
            } = event
            {
                println!("[INDEX] generation {generation}: {documents} documents in {duration:?}");
            }
        }
    });

    let mut extractions = Vec::new();
    for (name, body) in FILES {
        let path = workdir.path().join(name);
        tokio::fs::write(&path, body).await?;
        let ingestion = ctx
            .ingest(NewFileRecord::new(name, "text/plain", body.len() as u64, path))
            .await?;
        println!("[INGEST] stored {} as {}", name, ingestion.record.id);
        extractions.push(ingestion.extraction);
    }

    for extraction in extractions {
        match extraction.await?? {
            IngestOutcome::Extracted { record, index_job } => {
                println!(
                    "[EXTRACT] {}: {} words",
                    record.original_name,
                    record.metadata.word_count().unwrap_or(0)
                );
                if let Some(job) = index_job {
                    job.await?;
                }
            }
            IngestOutcome::Failed { record, error } => {
                println!("[EXTRACT] {} failed: {error}", record.original_name);
            }
            IngestOutcome::Cancelled => println!("[EXTRACT] cancelled"),
        }
    }

    for term in ["invoice", "harbr", "minutes invoice", "kayak"] {
        let page = ctx.search(&SearchQuery::new(term))?;
        println!("[SEARCH] {term:?}: {} hit(s) at generation {}", page.total, page.generation);
        for hit in &page.results {
            println!("    {:.3}  {}", hit.score, hit.file.original_name);
        }
    }

    let stats = ctx.queue_stats();
    println!(
        "[STATS] {} queued, {} running across {} queues",
        stats.total_queued(),
        stats.total_running(),
        stats.queues.len()
    );

    for report in ctx.shutdown_with(Duration::from_secs(1)).await {
        println!(
            "[SHUTDOWN] {}: dropped {}, abandoned {}",
            report.queue, report.dropped, report.abandoned
        );
    }
    Ok(())
}
