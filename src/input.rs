use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use bbinstr_frontend::{parse, Image};

pub fn read_file(path: &Path) -> anyhow::Result<String> {
    let mut buf = Vec::new();
    File::open(path)?.read_to_end(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

pub fn read_image(path: &Path) -> anyhow::Result<Image> {
    let text = read_file(path).with_context(|| format!("unable to read `{}`", path.display()))?;
    parse(&text).with_context(|| format!("`{}` is not a valid image", path.display()))
}
