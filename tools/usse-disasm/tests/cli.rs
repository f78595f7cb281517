#![cfg(not(target_arch = "wasm32"))]

use std::fs;
use std::path::Path;

use tempfile::tempdir;
use vgpu_usse::table::entry;
use vgpu_usse::InstructionKind;

fn write_program(path: &Path, header: &[u8], words: &[u64]) {
    let mut bytes = header.to_vec();
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    fs::write(path, bytes).unwrap();
}

fn mov() -> u64 {
    entry(InstructionKind::Vmov).encode(&[(b'p', 0)]).unwrap()
}

#[test]
fn prints_disassembly_and_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shader.bin");
    write_program(&path, &[], &[mov(), mov()]);

    let assert = assert_cmd::cargo::cargo_bin_cmd!("usse-disasm")
        .arg(&path)
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("VMOV"), "{stdout}");
    assert!(stdout.contains("block 0 +2"), "{stdout}");
    assert!(stdout.contains("block 2 +0"), "{stdout}");
}

#[test]
fn json_output_describes_instructions_and_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shader.bin");
    write_program(&path, &[0xEE; 4], &[mov(), u64::MAX]);

    let assert = assert_cmd::cargo::cargo_bin_cmd!("usse-disasm")
        .arg(&path)
        .args(["--skip-bytes", "4", "--json"])
        .assert()
        .success();
    let listing: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(listing["words"], 2);
    assert_eq!(listing["instructions"][0]["kind"], "Vmov");
    assert!(listing["blocks"].as_array().unwrap().len() >= 2);
}

#[test]
fn rejects_partial_words() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shader.bin");
    fs::write(&path, [0u8; 12]).unwrap();

    assert_cmd::cargo::cargo_bin_cmd!("usse-disasm")
        .arg(&path)
        .assert()
        .failure();
}
