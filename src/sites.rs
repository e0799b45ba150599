//! Static dive-site registry.
//!
//! This is the single source of truth for site ids. Every other module takes
//! sites from here (or from a caller-supplied slice in tests) rather than
//! hardcoding ids.
//!
//! Bearings point from open water toward shore. Exposure is a rough estimate
//! of how much open-ocean swell reaches the site, from local dive reports.

use crate::Site;

/// Monterey Peninsula shore-dive sites, north to south.
pub static SITE_REGISTRY: &[Site] = &[
    Site {
        id: "breakwater",
        name: "San Carlos Beach (Breakwater)",
        latitude: 36.6094,
        longitude: -121.8942,
        shoreline_bearing: 200.0,
        exposure: 0.2,
    },
    Site {
        id: "lovers-point",
        name: "Lovers Point",
        latitude: 36.6261,
        longitude: -121.9164,
        shoreline_bearing: 225.0,
        exposure: 0.45,
    },
    Site {
        id: "monastery",
        name: "Monastery Beach",
        latitude: 36.5253,
        longitude: -121.9264,
        shoreline_bearing: 90.0,
        exposure: 1.0,
    },
    Site {
        id: "whalers-cove",
        name: "Whalers Cove, Point Lobos",
        latitude: 36.5214,
        longitude: -121.9392,
        shoreline_bearing: 45.0,
        exposure: 0.3,
    },
];

/// Look up a site by id.
pub fn find(sites: &[Site], id: &str) -> Option<Site> {
    sites.iter().find(|site| site.id == id).copied()
}
