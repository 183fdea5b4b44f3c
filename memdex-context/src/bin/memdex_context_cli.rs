use clap::Parser;
use memdex_context::window::{ChunkSplitter, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use std::fs;
use std::io::{self, Read};
use std::process;

/// A CLI tool to split a memory document into overlapping windows as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Window length in characters.
    #[arg(short, long, default_value_t = DEFAULT_CHUNK_SIZE)]
    size: usize,

    /// Characters shared by adjacent windows.
    #[arg(short, long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    overlap: usize,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let splitter = match ChunkSplitter::new(args.size, args.overlap) {
        Ok(splitter) => splitter,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(2);
        }
    };

    let content = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let chunks = splitter.split(&content);
    let json_output = serde_json::to_string_pretty(&chunks)?;
    println!("{json_output}");

    Ok(())
}
