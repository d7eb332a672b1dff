//! Bundle diagram rendering.
//!
//! Renders a bundle as an SVG: one tile per service with the referenced
//! charm's icon and the service name, and a line per relation. Icon hrefs
//! are produced by the caller so they can be made relative to the serving
//! request URI.

use emporium_core::bundle::BundleData;
use emporium_core::reference::ArtifactRef;
use std::collections::BTreeMap;
use std::fmt::Write;

const TILE_WIDTH: i64 = 140;
const TILE_HEIGHT: i64 = 140;
const ICON_SIZE: i64 = 96;
const COLUMNS: i64 = 4;

/// Render the bundle as an SVG document.
///
/// `icon_url` maps a referenced charm's ref to the URL its icon should be
/// fetched from.
pub fn render(data: &BundleData, mut icon_url: impl FnMut(&ArtifactRef) -> String) -> String {
    // BTreeMap ordering makes tile placement deterministic.
    let positions: BTreeMap<&str, (i64, i64)> = data
        .services
        .keys()
        .enumerate()
        .map(|(i, name)| {
            let col = i as i64 % COLUMNS;
            let row = i as i64 / COLUMNS;
            (name.as_str(), (col * TILE_WIDTH, row * TILE_HEIGHT))
        })
        .collect();

    let count = data.services.len() as i64;
    let width = TILE_WIDTH * count.min(COLUMNS).max(1);
    let height = TILE_HEIGHT * (count.max(1) + COLUMNS - 1) / COLUMNS;

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
    );

    // Relation lines run under the tiles.
    for relation in &data.relations {
        if relation.len() != 2 {
            continue;
        }
        let ends: Vec<_> = relation
            .iter()
            .filter_map(|endpoint| {
                let service = endpoint.split(':').next().unwrap_or(endpoint);
                positions.get(service)
            })
            .collect();
        if let [a, b] = ends[..] {
            let _ = write!(
                svg,
                r##"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="#888888" stroke-width="2"/>"##,
                a.0 + TILE_WIDTH / 2,
                a.1 + TILE_HEIGHT / 2,
                b.0 + TILE_WIDTH / 2,
                b.1 + TILE_HEIGHT / 2,
            );
        }
    }

    for (name, service) in &data.services {
        let (x, y) = positions[name.as_str()];
        let _ = write!(svg, r#"<g transform="translate({x},{y})">"#);
        if let Ok(charm_url) = ArtifactRef::parse(&service.charm) {
            let href = icon_url(&charm_url);
            let _ = write!(
                svg,
                r#"<image x="{}" y="8" width="{ICON_SIZE}" height="{ICON_SIZE}" xlink:href="{}"/>"#,
                (TILE_WIDTH - ICON_SIZE) / 2,
                escape(&href),
            );
        }
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-size="14">{}</text>"#,
            TILE_WIDTH / 2,
            TILE_HEIGHT - 16,
            escape(name),
        );
        svg.push_str("</g>");
    }

    svg.push_str("</svg>");
    svg
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
