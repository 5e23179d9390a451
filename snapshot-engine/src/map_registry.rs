//! Static table of supported maps and their default parameters.
//!
//! Grounded in `original_source/server/config.py`'s `DEFAULT_MAP_DEFINITIONS`
//! (same seven maps, same per-map scale/width/height/spawns), restructured as
//! a compile-time Rust table the way `dod`'s message enums are kept as plain
//! compiled-in data rather than loaded config.

/// One team's known spawn points, in world units.
pub type Spawns = &'static [(f64, f64)];

#[derive(Clone, Copy, Debug)]
pub struct MapDefinition {
    /// Canonical key, e.g. `"Mirage"`. Always title-cased with no `de_` prefix.
    pub key: &'static str,
    pub display_scale: f64,
    pub radar_width: u32,
    pub radar_height: u32,
    pub radar_scale: f64,
    pub origin_x: f64,
    pub origin_y: f64,
    pub spawns_t: Spawns,
    pub spawns_ct: Spawns,
}

const T_MIRAGE: Spawns = &[(-1200.0, -800.0), (-1000.0, -1000.0), (-800.0, -900.0)];
const CT_MIRAGE: Spawns = &[(200.0, 200.0), (400.0, 100.0), (300.0, 300.0)];
const T_INFERNO: Spawns = &[(-1500.0, -1500.0), (-1300.0, -1600.0)];
const CT_INFERNO: Spawns = &[(500.0, 500.0), (600.0, 400.0)];
const T_NUKE: Spawns = &[(-1500.0, -2500.0)];
const CT_NUKE: Spawns = &[(500.0, 500.0)];
const T_DUST2: Spawns = &[(-1800.0, -2500.0)];
const CT_DUST2: Spawns = &[(500.0, 2500.0)];
const T_ANCIENT: Spawns = &[(-1500.0, -1200.0)];
const CT_ANCIENT: Spawns = &[(500.0, 500.0)];
const T_VERTIGO: Spawns = &[(0.0, -1500.0)];
const CT_VERTIGO: Spawns = &[(0.0, 1500.0)];
const T_OVERPASS: Spawns = &[(-1500.0, -500.0)];
const CT_OVERPASS: Spawns = &[(500.0, 2500.0)];
const T_ANUBIS: Spawns = &[(-1500.0, -500.0)];
const CT_ANUBIS: Spawns = &[(500.0, 2500.0)];

const MAPS: &[MapDefinition] = &[
    MapDefinition {
        key: "Mirage",
        display_scale: 220.0,
        radar_width: 220,
        radar_height: 200,
        radar_scale: 4.4,
        origin_x: 0.0,
        origin_y: 0.0,
        spawns_t: T_MIRAGE,
        spawns_ct: CT_MIRAGE,
    },
    MapDefinition {
        key: "Inferno",
        display_scale: 280.0,
        radar_width: 280,
        radar_height: 275,
        radar_scale: 3.5,
        origin_x: 0.0,
        origin_y: 0.0,
        spawns_t: T_INFERNO,
        spawns_ct: CT_INFERNO,
    },
    MapDefinition {
        key: "Nuke",
        display_scale: 300.0,
        radar_width: 300,
        radar_height: 275,
        radar_scale: 3.3,
        origin_x: 0.0,
        origin_y: 0.0,
        spawns_t: T_NUKE,
        spawns_ct: CT_NUKE,
    },
    MapDefinition {
        key: "Dust2",
        display_scale: 260.0,
        radar_width: 260,
        radar_height: 240,
        radar_scale: 3.8,
        origin_x: 0.0,
        origin_y: 0.0,
        spawns_t: T_DUST2,
        spawns_ct: CT_DUST2,
    },
    MapDefinition {
        key: "Ancient",
        display_scale: 300.0,
        radar_width: 300,
        radar_height: 300,
        radar_scale: 3.3,
        origin_x: 0.0,
        origin_y: 0.0,
        spawns_t: T_ANCIENT,
        spawns_ct: CT_ANCIENT,
    },
    MapDefinition {
        key: "Vertigo",
        display_scale: 240.0,
        radar_width: 240,
        radar_height: 240,
        radar_scale: 4.16,
        origin_x: 0.0,
        origin_y: 0.0,
        spawns_t: T_VERTIGO,
        spawns_ct: CT_VERTIGO,
    },
    MapDefinition {
        key: "Overpass",
        display_scale: 320.0,
        radar_width: 320,
        radar_height: 240,
        radar_scale: 3.125,
        origin_x: 0.0,
        origin_y: 0.0,
        spawns_t: T_OVERPASS,
        spawns_ct: CT_OVERPASS,
    },
    MapDefinition {
        key: "Anubis",
        display_scale: 5.22,
        radar_width: 1024,
        radar_height: 1024,
        radar_scale: 5.22,
        origin_x: 0.0,
        origin_y: 0.0,
        spawns_t: T_ANUBIS,
        spawns_ct: CT_ANUBIS,
    },
];

/// Lower-case, strip a leading `de_`, capitalize the first remaining
/// character. Matches `original_source/server/demo_parser.py::_normalize_map_name`.
pub fn normalize_map_name(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let stripped = lower.strip_prefix("de_").unwrap_or(&lower);
    let mut chars = stripped.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Static registry of known maps. Lookups never fail loudly — an unknown map
/// just means no definition, not an error.
pub struct MapRegistry;

impl MapRegistry {
    /// All known map keys, in declaration order.
    pub fn keys() -> impl Iterator<Item = &'static str> {
        MAPS.iter().map(|m| m.key)
    }

    /// Look up a map by any casing/`de_`-prefixed spelling of its name.
    pub fn lookup(name: &str) -> Option<&'static MapDefinition> {
        let normalized = normalize_map_name(name);
        MAPS.iter().find(|m| m.key.eq_ignore_ascii_case(&normalized))
    }

    /// Look up by an already-normalized key (case-insensitive exact match,
    /// no further normalization). Used once a map has already been resolved.
    pub fn get(key: &str) -> Option<&'static MapDefinition> {
        MAPS.iter().find(|m| m.key.eq_ignore_ascii_case(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_de_prefixed_lowercase_name() {
        assert_eq!(normalize_map_name("de_mirage"), "Mirage");
        assert_eq!(normalize_map_name("DE_DUST2"), "Dust2");
        assert_eq!(normalize_map_name("Inferno"), "Inferno");
    }

    #[test]
    fn lookup_matches_case_insensitively() {
        assert!(MapRegistry::lookup("de_nuke").is_some());
        assert!(MapRegistry::lookup("NUKE").is_some());
        assert_eq!(MapRegistry::lookup("nuke").unwrap().key, "Nuke");
    }

    #[test]
    fn lookup_miss_returns_none_not_error() {
        assert!(MapRegistry::lookup("de_nonexistent").is_none());
    }

    #[test]
    fn keys_cover_all_known_maps() {
        assert_eq!(MapRegistry::keys().count(), 8);
    }
}
