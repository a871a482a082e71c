//! `profile-rag query`: run retrieval locally and print what the answer
//! path would see.

use anyhow::Result;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::retriever::{Retrieval, RetrievalOptions, RetrievalService};

/// How to print a retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutput {
    /// Ranked hits with distances and snippets.
    Hits,
    /// The concatenated context string.
    Context,
    /// The full retrieval as JSON.
    Json,
}

pub async fn run_query(config: &Config, question: &str, k: Option<usize>, output: QueryOutput) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let options = RetrievalOptions::from_config(config);
    let annotate = options.annotate_origins;
    let k = k.unwrap_or(options.k);
    let service = RetrievalService::load(&config.storage.root, embedder, options).await?;

    let retrieval = service.retrieve(question, k).await;
    match output {
        QueryOutput::Json => println!("{}", serde_json::to_string_pretty(&retrieval)?),
        QueryOutput::Context => println!("{}", retrieval.context(annotate)),
        QueryOutput::Hits => print_hits(question, &retrieval),
    }
    Ok(())
}

fn print_hits(question: &str, retrieval: &Retrieval) {
    println!("query \"{}\"", question);
    match retrieval {
        Retrieval::Hits(result) => {
            for (rank, hit) in result.iter().enumerate() {
                println!(
                    "  {:>2}. [{:.4}] {} (chunk {})",
                    rank + 1,
                    hit.distance,
                    hit.chunk.origin,
                    hit.chunk.id
                );
                println!("      {}", snippet(&hit.chunk.text, 160));
            }
        }
        Retrieval::Fallback { context, reason } => {
            println!("  fallback ({})", reason);
            println!("      {}", snippet(context, 160));
        }
    }
}

/// First `max_chars` characters on one line.
fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_flattens_and_truncates() {
        assert_eq!(snippet("a\n\n b  c", 10), "a b c");
        assert_eq!(snippet("héllo world", 5), "héllo...");
    }
}
