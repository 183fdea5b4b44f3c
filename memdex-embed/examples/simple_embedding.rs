//! Embed a few texts with the provider selected by the environment.
//!
//! ```sh
//! EMBEDDING_PROVIDER=openai OPENAI_API_KEY=sk-... cargo run --example simple_embedding
//! ```

use memdex_embed::{EmbedConfig, EmbeddingGateway};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = EmbedConfig::default().with_env_overrides().with_batch_size(2);
    let gateway = EmbeddingGateway::from_config(&config)?;

    println!("Provider: {}", gateway.identity());
    println!("Timeout: {:?}", gateway.timeout());

    let text = "The staging database password rotates every Friday.";
    match gateway.embed(text).await {
        Ok(embedding) => {
            println!("\"{text}\"");
            println!("  dimension: {}", embedding.len());
            println!("  first values: {:?}", &embedding[..5.min(embedding.len())]);
        }
        Err(e) => println!("Embedding unavailable, retrieval would run lexical-only: {e}"),
    }

    let texts = vec![
        "Prefers short answers.".to_string(),
        "Works in UTC+2.".to_string(),
        "Deploys go out on Tuesdays.".to_string(),
    ];
    let vectors = gateway.embed_batch(&texts).await;
    for (text, vector) in texts.iter().zip(&vectors) {
        match vector {
            Some(v) => println!("\"{text}\": {} dims", v.len()),
            None => println!("\"{text}\": no vector"),
        }
    }

    Ok(())
}
