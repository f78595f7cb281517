use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use vgpu_usse::{analyze, disasm, words_from_le_bytes, AnalyzedProgram, Block, InstructionKind};

#[derive(Parser, Debug)]
#[command(
    name = "usse-disasm",
    about = "Disassemble a USSE shader binary and list its control-flow blocks."
)]
struct Args {
    /// Shader binary: little-endian 64-bit instruction words
    input: PathBuf,

    /// Bytes to skip before the first instruction word (program header)
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    skip_bytes: usize,

    /// Print only the block listing
    #[arg(long, action = clap::ArgAction::SetTrue)]
    blocks_only: bool,

    /// Print JSON instead of text
    #[arg(long, action = clap::ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct JsonListing<'a> {
    words: usize,
    instructions: Vec<JsonInstruction>,
    blocks: &'a [Block],
    /// Offsets of undecodable words on reachable paths.
    decode_errors: Vec<u32>,
}

#[derive(Debug, Serialize)]
struct JsonInstruction {
    offset: u32,
    word: String,
    kind: Option<InstructionKind>,
    text: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    run(args)
}

fn run(args: Args) -> anyhow::Result<()> {
    let bytes = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let Some(body) = bytes.get(args.skip_bytes..) else {
        bail!(
            "--skip-bytes {} is past the end of the input ({} bytes)",
            args.skip_bytes,
            bytes.len()
        );
    };
    if body.len() % 8 != 0 {
        bail!(
            "input is not a whole number of 64-bit words ({} trailing bytes)",
            body.len() % 8
        );
    }

    let words = words_from_le_bytes(body);
    let program = analyze(&words);

    if args.json {
        let listing = json_listing(&program);
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }
    if !args.blocks_only {
        print!("{}", disasm::disassemble(&program));
        println!();
    }
    print!("{}", disasm::block_listing(&program));
    Ok(())
}

fn json_listing(program: &AnalyzedProgram) -> JsonListing<'_> {
    let instructions = program
        .instructions()
        .iter()
        .enumerate()
        .map(|(offset, inst)| match inst {
            Ok(inst) => JsonInstruction {
                offset: offset as u32,
                word: format!("{:016x}", inst.word),
                kind: Some(inst.kind),
                text: Some(inst.to_string()),
            },
            Err(err) => JsonInstruction {
                offset: offset as u32,
                word: format!("{:016x}", err.word),
                kind: None,
                text: None,
            },
        })
        .collect();
    JsonListing {
        words: program.instructions().len(),
        instructions,
        blocks: program.blocks(),
        decode_errors: program.errors().iter().map(|err| err.offset).collect(),
    }
}
