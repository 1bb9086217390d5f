mod common;

use std::fs;
use std::process::Command;

use strip_paster::container::{read_header, SIGNATURE};
use strip_paster::{decode_strip, Header};
use tempfile::tempdir;

use common::{strip_bytes, strip_header, WIDTH};

fn catpng() -> Command {
    Command::new(env!("CARGO_BIN_EXE_catpng"))
}

#[test]
fn concatenates_files_in_argument_order() {
    let dir = tempdir().unwrap();
    let mut inputs = Vec::new();
    for (index, height) in [4u32, 2, 6].into_iter().enumerate() {
        let path = dir.path().join(format!("strip_{index}.png"));
        fs::write(&path, strip_bytes(&strip_header(height), index as u8 + 1)).unwrap();
        inputs.push(path);
    }
    let output = dir.path().join("all.png");

    let status = catpng()
        .args(&inputs)
        .arg("-o")
        .arg(&output)
        .status()
        .unwrap();
    assert!(status.success());

    let bytes = fs::read(&output).unwrap();
    let header = read_header(&mut std::io::Cursor::new(&bytes), SIGNATURE.len() as u64).unwrap();
    assert_eq!(header.width, WIDTH);
    assert_eq!(header.height, 12);

    let image = decode_strip(&bytes).unwrap();
    let row = header.scanline_len();
    assert!(image.raw[..4 * row].iter().all(|b| *b == 1));
    assert!(image.raw[4 * row..6 * row].iter().all(|b| *b == 2));
    assert!(image.raw[6 * row..].iter().all(|b| *b == 3));
}

#[test]
fn invalid_and_incompatible_inputs_are_skipped() {
    let dir = tempdir().unwrap();
    let good = dir.path().join("good.png");
    let text = dir.path().join("notes.txt");
    let narrow = dir.path().join("narrow.png");
    let missing = dir.path().join("missing.png");
    fs::write(&good, strip_bytes(&strip_header(6), 9)).unwrap();
    fs::write(&text, b"not an image").unwrap();
    let narrow_header = Header { width: 10, ..strip_header(6) };
    fs::write(&narrow, strip_bytes(&narrow_header, 9)).unwrap();
    let output = dir.path().join("all.png");

    let status = catpng()
        .args([&good, &text, &narrow, &missing])
        .arg("--output")
        .arg(&output)
        .status()
        .unwrap();
    assert!(status.success());

    let image = decode_strip(&fs::read(&output).unwrap()).unwrap();
    assert_eq!(image.header, strip_header(6));
}

#[test]
fn no_valid_input_writes_nothing() {
    let dir = tempdir().unwrap();
    let text = dir.path().join("notes.txt");
    fs::write(&text, b"still not an image").unwrap();
    let output = dir.path().join("all.png");

    let status = catpng().arg(&text).arg("-o").arg(&output).status().unwrap();
    assert!(status.success());
    assert!(!output.exists());
}
