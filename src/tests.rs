use std::fs;
use std::path::Path;

use clap::Parser;
use serde_json::Value;

use crate::args::{Arguments, Command, InstrumentOptions, Options};
use crate::instrument::{instrument, listing};
use crate::input::read_image;

const IMAGE: &str = r#"{
    "kind": "exe",
    "header": 0,
    "sections": [{ "name": ".text", "characteristics": 1610612768 }],
    "blocks": [
        {
            "name": "header",
            "type": "data",
            "size": 64,
            "references": [{ "offset": 40, "kind": "relative", "size": 4, "target": 1 }]
        },
        {
            "name": "main",
            "type": "code",
            "section": 0,
            "size": 2,
            "address": 4096,
            "data": [64, 195],
            "instructions": [
                { "offset": 0, "size": 1, "flow": "next" },
                { "offset": 1, "size": 1, "flow": "exit" }
            ]
        }
    ]
}"#;

fn options(dir: &Path, image: &str) -> InstrumentOptions {
    let path = dir.join("image.json");
    fs::write(&path, image).unwrap();

    InstrumentOptions {
        input: Options { path },
        output: None,
        ranges: Some(dir.join("ranges.json")),
        thunk_source_ranges: false,
        verify: true,
        listing: false,
    }
}

#[test]
fn arguments_parse() {
    let args = Arguments::parse_from([
        "bbi",
        "-vv",
        "instrument",
        "image.json",
        "--ranges",
        "ranges.json",
        "--verify",
    ]);

    assert_eq!(2, args.verbose);
    let Command::Instrument(options) = &args.command else {
        panic!("expected the instrument command");
    };

    assert_eq!(Path::new("image.json"), args.command.options().path);
    assert_eq!(Path::new("image.instr.json"), options.output());
    assert!(options.verify);
    assert!(!options.listing);

    let args = Arguments::parse_from(["bbi", "d", "image.json"]);
    assert!(matches!(args.command, Command::Dump(_)));
}

#[test]
fn instrumenting_writes_the_image_and_ranges() {
    let dir = tempfile::tempdir().unwrap();
    let options = options(dir.path(), IMAGE);

    instrument(&options).unwrap();

    let image = read_image(&options.output()).unwrap();
    let main = image
        .graph
        .blocks()
        .find(|block| block.name == "main")
        .unwrap();
    assert_eq!(&main.data[..5], &[0x68, 0, 0, 0, 0]);
    assert_eq!(18, main.size);

    let ranges: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("ranges.json")).unwrap()).unwrap();
    assert_eq!(
        serde_json::json!([{ "id": 0, "start": 4096, "size": 2 }]),
        ranges["basic_blocks"]
    );
    assert_eq!(serde_json::json!([]), ranges["conditionals"]);
    assert_eq!(".thunks", ranges["thunk_section"]);
}

#[test]
fn failed_passes_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let image = IMAGE.replace(r#""address": 4096,"#, "");
    let options = options(dir.path(), &image);

    let result = instrument(&options);

    assert!(result.is_err());
    assert!(!options.output().exists());
    assert!(!dir.path().join("ranges.json").exists());
}

#[test]
fn failed_range_writes_remove_the_image() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = options(dir.path(), IMAGE);
    options.ranges = Some(dir.path().join("missing").join("ranges.json"));

    let result = instrument(&options);

    assert!(result.is_err());
    assert!(!options.output().exists());
    assert!(options.input.path.exists());
}

#[test]
fn listings_show_decomposable_code() {
    let dir = tempfile::tempdir().unwrap();
    let options = options(dir.path(), IMAGE);

    let image = read_image(&options.input.path).unwrap();
    let text = listing(&image.graph).unwrap();

    assert!(text.starts_with("main:\n"));
    assert!(text.contains("inc eax"));
    assert!(text.contains("ret"));
}
