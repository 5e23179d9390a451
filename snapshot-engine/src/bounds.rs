//! World-space bounds resolution from three sources in priority order:
//! an explicit bounds file, third-party radar metadata, then radar-overview
//! metadata. Grounded in
//! `original_source/server/demo_parser.py` (`_load_fixed_bounds`,
//! `_load_boltobserv_bounds`, `_load_overview_bounds`) and
//! `original_source/server/config.py` (`load_boltobserv_meta`, `_strip_json5`).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl WorldBounds {
    fn normalized(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self {
            min_x: min_x.min(max_x),
            max_x: min_x.max(max_x),
            min_y: min_y.min(max_y),
            max_y: min_y.max(max_y),
        }
    }

    /// Widen in place to include `(x, y)`. Never called once bounds are fixed.
    pub fn widen(&mut self, x: f64, y: f64) {
        if x < self.min_x {
            self.min_x = x;
        }
        if x > self.max_x {
            self.max_x = x;
        }
        if y < self.min_y {
            self.min_y = y;
        }
        if y > self.max_y {
            self.max_y = y;
        }
    }
}

/// A bounds value that hasn't observed any positions yet widens from the
/// first observed point rather than from `(0, 0)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObservedBounds(Option<WorldBounds>);

impl ObservedBounds {
    pub fn widen(&mut self, x: f64, y: f64) {
        match &mut self.0 {
            Some(bounds) => bounds.widen(x, y),
            None => {
                self.0 = Some(WorldBounds {
                    min_x: x,
                    max_x: x,
                    min_y: y,
                    max_y: y,
                })
            }
        }
    }

    pub fn get(&self) -> Option<WorldBounds> {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub flip_x: bool,
    pub flip_y: bool,
    pub rotate_deg: f64,
}

/// What BoundsResolver hands back: possibly-fixed bounds plus whatever
/// z-range/transform the winning (or a lower-priority, z-range-only) source
/// contributed.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResolvedBounds {
    pub bounds: Option<WorldBounds>,
    pub z_range: Option<ZRange>,
    pub transform: Option<Transform>,
    pub fixed: bool,
}

#[derive(Debug, Deserialize)]
struct TransformEntry {
    #[serde(default)]
    flip_x: bool,
    #[serde(default)]
    flip_y: bool,
    #[serde(default)]
    rotate_deg: f64,
}

#[derive(Debug, Deserialize)]
struct ZRangeEntry {
    min: f64,
    max: f64,
}

#[derive(Debug, Deserialize)]
struct BoundsFileEntry {
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
    #[serde(default)]
    transform: Option<TransformEntry>,
    #[serde(default)]
    z_range: Option<ZRangeEntry>,
}

fn entry_to_resolved(entry: &BoundsFileEntry) -> ResolvedBounds {
    ResolvedBounds {
        bounds: Some(WorldBounds::normalized(
            entry.min_x,
            entry.max_x,
            entry.min_y,
            entry.max_y,
        )),
        z_range: entry.z_range.as_ref().map(|z| ZRange { min: z.min, max: z.max }),
        transform: entry.transform.as_ref().map(|t| Transform {
            flip_x: t.flip_x,
            flip_y: t.flip_y,
            rotate_deg: t.rotate_deg,
        }),
        fixed: true,
    }
}

/// Strip `//` line comments, `/* */` block comments, and trailing commas
/// before `}`/`]` so JSON5-with-comments radar metadata parses as plain
/// JSON. Mirrors `config._strip_json5`.
pub fn strip_json5(text: &str) -> String {
    let mut without_block_comments = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    break;
                }
            }
            continue;
        }
        without_block_comments.push(c);
    }

    let without_line_comments: String = without_block_comments
        .lines()
        .map(|line| match line.find("//") {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut out = String::with_capacity(without_line_comments.len());
    let bytes: Vec<char> = without_line_comments.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ',' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_whitespace() {
                j += 1;
            }
            if j < bytes.len() && (bytes[j] == '}' || bytes[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Explicit bounds file: a JSON object keyed by map name.
pub fn load_explicit_bounds(path: &Path, map_key: &str) -> Option<ResolvedBounds> {
    let raw = fs::read_to_string(path).ok()?;
    let table: HashMap<String, BoundsFileEntry> = serde_json::from_str(&raw).ok()?;
    table.get(map_key).map(entry_to_resolved)
}

/// Folder-per-map third-party radar meta: `<base_dir>/de_<map>/meta.json5`.
pub fn load_radar_meta(base_dir: &Path, map_key: &str) -> Option<ResolvedBounds> {
    if !base_dir.is_dir() {
        return None;
    }
    let entries = fs::read_dir(base_dir).ok()?;
    for entry in entries.flatten() {
        let folder_name = entry.file_name();
        let folder_name = folder_name.to_string_lossy();
        if crate::map_registry::normalize_map_name(&folder_name) != map_key {
            continue;
        }
        let meta_path = entry.path().join("meta.json5");
        let raw = fs::read_to_string(&meta_path).ok()?;
        let stripped = strip_json5(&raw);
        let data: serde_json::Value = serde_json::from_str(&stripped).ok()?;
        let resolution = data.get("resolution")?.as_f64()?;
        let offset = data.get("offset")?;
        let offset_x = offset.get("x")?.as_f64()?;
        let offset_y = offset.get("y")?.as_f64()?;
        let radar_size = 1024.0;
        let min_x = -offset_x;
        let min_y = -offset_y;
        let max_x = min_x + resolution * radar_size;
        let max_y = min_y + resolution * radar_size;
        let z_range = data.get("zRange").and_then(|z| {
            Some(ZRange {
                min: z.get("min")?.as_f64()?,
                max: z.get("max")?.as_f64()?,
            })
        });
        return Some(ResolvedBounds {
            bounds: Some(WorldBounds::normalized(min_x, max_x, min_y, max_y)),
            z_range,
            transform: None,
            fixed: true,
        });
    }
    None
}

fn find_float_after_key(text: &str, key: &str) -> Option<f64> {
    let idx = text.find(key)?;
    let rest = &text[idx + key.len()..];
    let mut chars = rest.chars().peekable();
    let mut token = String::new();
    // Skip separators (quotes, colons, whitespace) before the number.
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || c == '-' {
            break;
        }
        chars.next();
    }
    for c in chars {
        if c.is_ascii_digit() || c == '.' || c == '-' {
            token.push(c);
        } else {
            break;
        }
    }
    token.parse().ok()
}

/// Radar-overview metadata: a structured file with explicit bounds, or a
/// text file with `pos_x`, `pos_y`, `scale`, `width`/`height` keys.
pub fn load_overview_bounds(dir: &Path, map_key: &str) -> Option<ResolvedBounds> {
    let json_path = dir.join(format!("{map_key}.json"));
    if json_path.is_file() {
        if let Ok(raw) = fs::read_to_string(&json_path) {
            if let Ok(entry) = serde_json::from_str::<BoundsFileEntry>(&raw) {
                return Some(entry_to_resolved(&entry));
            }
        }
    }

    let txt_path = dir.join(format!("{map_key}.txt"));
    let raw = fs::read_to_string(txt_path).ok()?;
    let pos_x = find_float_after_key(&raw, "pos_x")?;
    let pos_y = find_float_after_key(&raw, "pos_y")?;
    let scale = find_float_after_key(&raw, "scale")?;
    let width = find_float_after_key(&raw, "width")
        .or_else(|| find_float_after_key(&raw, "res_x"))
        .or_else(|| find_float_after_key(&raw, "resolution"))
        .unwrap_or(1024.0);
    let height = find_float_after_key(&raw, "height")
        .or_else(|| find_float_after_key(&raw, "res_y"))
        .or_else(|| find_float_after_key(&raw, "resolution"))
        .unwrap_or(1024.0);
    let max_x = pos_x + scale * width;
    let max_y = pos_y + scale * height;
    Some(ResolvedBounds {
        bounds: Some(WorldBounds::normalized(pos_x, max_x, pos_y, max_y)),
        z_range: None,
        transform: None,
        fixed: true,
    })
}

/// Directory paths for the three sources, resolved once at startup from
/// settings (env > config file > default).
pub struct BoundsSources<'a> {
    pub explicit_bounds_file: &'a Path,
    pub radar_meta_dir: &'a Path,
    pub overview_dir: &'a Path,
}

/// Resolve bounds for `map_key` trying each source in priority order. The
/// first source to produce bounds commits them (and `fixed = true`); lower
/// priority sources are still consulted to fill `z_range` if it's still
/// empty, an explicit carve-out for that field.
pub fn resolve_bounds(map_key: &str, sources: &BoundsSources) -> ResolvedBounds {
    let mut resolved = ResolvedBounds::default();

    let candidates = [
        load_explicit_bounds(sources.explicit_bounds_file, map_key),
        load_radar_meta(sources.radar_meta_dir, map_key),
        load_overview_bounds(sources.overview_dir, map_key),
    ];

    for candidate in candidates.into_iter().flatten() {
        if resolved.bounds.is_none() {
            resolved.bounds = candidate.bounds;
            resolved.transform = candidate.transform;
            resolved.fixed = true;
        }
        if resolved.z_range.is_none() {
            resolved.z_range = candidate.z_range;
        }
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn strip_json5_removes_comments_and_trailing_commas() {
        let raw = r#"
        // line comment
        {
          "resolution": 2.0, /* block comment */
          "offset": {"x": 128, "y": 256,},
        }
        "#;
        let stripped = strip_json5(raw);
        assert!(!stripped.contains("line comment"));
        assert!(!stripped.contains("block comment"));
        assert!(!stripped.contains(",}"));
        assert!(!stripped.contains(",]"));
    }

    #[test]
    fn radar_meta_derivation_matches_spec_example() {
        let dir = tempdir();
        let map_dir = dir.join("de_test");
        fs::create_dir_all(&map_dir).unwrap();
        let mut file = fs::File::create(map_dir.join("meta.json5")).unwrap();
        writeln!(
            file,
            r#"{{
                // comment
                "resolution": 2.0,
                "offset": {{"x": 128, "y": 256,}},
                "zRange": {{"min": -100, "max": 200,}}
            }}"#
        )
        .unwrap();

        let resolved = load_radar_meta(&dir, "Test").expect("should resolve");
        let bounds = resolved.bounds.unwrap();
        assert_eq!(bounds.min_x, -128.0);
        assert_eq!(bounds.min_y, -256.0);
        assert_eq!(bounds.max_x, -128.0 + 2.0 * 1024.0);
        assert_eq!(bounds.max_y, -256.0 + 2.0 * 1024.0);
        assert_eq!(resolved.z_range, Some(ZRange { min: -100.0, max: 200.0 }));
        assert!(resolved.fixed);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn explicit_file_wins_over_radar_meta() {
        let dir = tempdir();
        fs::write(
            dir.join("bounds.json"),
            r#"{"Test": {"min_x": -1.0, "max_x": 1.0, "min_y": -2.0, "max_y": 2.0}}"#,
        )
        .unwrap();
        let map_dir = dir.join("de_test");
        fs::create_dir_all(&map_dir).unwrap();
        fs::write(
            map_dir.join("meta.json5"),
            r#"{"resolution": 2.0, "offset": {"x": 128, "y": 256}}"#,
        )
        .unwrap();

        let sources = BoundsSources {
            explicit_bounds_file: &dir.join("bounds.json"),
            radar_meta_dir: &dir,
            overview_dir: &dir,
        };
        let resolved = resolve_bounds("Test", &sources);
        assert_eq!(resolved.bounds.unwrap().min_x, -1.0);
        assert!(resolved.fixed);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn world_bounds_widen_grows_hull_only() {
        let mut bounds = WorldBounds { min_x: -1.0, max_x: 1.0, min_y: -1.0, max_y: 1.0 };
        bounds.widen(2.0, 0.0);
        bounds.widen(-3.0, 5.0);
        assert_eq!(bounds, WorldBounds { min_x: -3.0, max_x: 2.0, min_y: -1.0, max_y: 5.0 });
    }

    fn tempdir() -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("snapshot-engine-bounds-test-{}", std::process::id()));
        dir.push(format!("{:?}", std::time::Instant::now()).replace([':', '.', ' '], "_"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}
