//! Icon SVG processing.
//!
//! Icons are served with a `viewBox` attribute so that clients can scale
//! them. Icons that already carry one, or that lack the width/height needed
//! to synthesise one, pass through byte-for-byte unchanged.

use crate::error::{Error, Result};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::Event;
use std::io::Cursor;

/// The icon served when a charm does not ship one.
pub const DEFAULT_ICON: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 96 96">
<rect x="2" y="2" width="92" height="92" rx="14" fill="#dd4814"/>
<circle cx="48" cy="48" r="26" fill="none" stroke="#ffffff" stroke-width="6"/>
<circle cx="48" cy="48" r="8" fill="#ffffff"/>
</svg>
"##;

/// Rewrite an icon SVG, injecting `viewBox="0 0 {width} {height}"` on the
/// root element when it lacks a viewBox but declares both width and height.
/// Any other input is returned unchanged, so the operation is idempotent.
pub fn process_icon(input: &[u8]) -> Result<Vec<u8>> {
    let injected = match root_svg_view_box(input)? {
        Some(view_box) => view_box,
        None => return Ok(input.to_vec()),
    };

    let mut reader = Reader::from_reader(input);
    let mut writer = Writer::new(Cursor::new(Vec::with_capacity(input.len() + 32)));
    let mut done = false;
    let mut buf = Vec::new();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::BadArchive(format!("cannot parse icon SVG: {e}")))?;
        match event {
            Event::Eof => break,
            Event::Start(e) if !done && e.local_name().as_ref() == b"svg" => {
                let mut elem = e.into_owned();
                elem.push_attribute(("viewBox", injected.as_str()));
                writer
                    .write_event(Event::Start(elem))
                    .map_err(write_error)?;
                done = true;
            }
            Event::Empty(e) if !done && e.local_name().as_ref() == b"svg" => {
                let mut elem = e.into_owned();
                elem.push_attribute(("viewBox", injected.as_str()));
                writer
                    .write_event(Event::Empty(elem))
                    .map_err(write_error)?;
                done = true;
            }
            other => writer.write_event(other).map_err(write_error)?,
        }
        buf.clear();
    }
    Ok(writer.into_inner().into_inner())
}

fn write_error(e: std::io::Error) -> Error {
    Error::BadArchive(format!("cannot encode icon SVG: {e}"))
}

/// Inspect the root `svg` element. Returns the viewBox value to inject, or
/// None when the icon should pass through unchanged (viewBox already
/// present, width/height missing, or no svg root at all).
fn root_svg_view_box(input: &[u8]) -> Result<Option<String>> {
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::BadArchive(format!("cannot parse icon SVG: {e}")))?;
        let elem = match event {
            Event::Eof => return Ok(None),
            Event::Start(e) | Event::Empty(e) => e,
            _ => {
                buf.clear();
                continue;
            }
        };
        if elem.local_name().as_ref() != b"svg" {
            // The document's root element is not svg; leave it alone.
            return Ok(None);
        }
        let mut width = None;
        let mut height = None;
        for attr in elem.attributes() {
            let attr = attr.map_err(|e| Error::BadArchive(format!("cannot parse icon SVG: {e}")))?;
            match attr.key.local_name().as_ref() {
                b"viewBox" => return Ok(None),
                b"width" => {
                    width = Some(String::from_utf8_lossy(&attr.value).into_owned());
                }
                b"height" => {
                    height = Some(String::from_utf8_lossy(&attr.value).into_owned());
                }
                _ => {}
            }
        }
        return Ok(match (width, height) {
            (Some(w), Some(h)) => Some(format!("0 0 {w} {h}")),
            _ => None,
        });
    }
}
