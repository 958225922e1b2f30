/// Geography registry for the Washington dependency-ratio report.
///
/// Defines the canonical, ordered list of the 40 geographies the source
/// table reports on: the statewide aggregate, pinned first, then the 39
/// counties in alphabetical order. This is the single source of truth for
/// geography labels; all other modules go through `Geography` rather than
/// comparing raw strings.

use crate::model::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label of the statewide aggregate row.
pub const STATEWIDE_LABEL: &str = "Washington State";

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeographyKind {
    Statewide,
    County,
}

/// Metadata for one geography.
pub struct GeographyInfo {
    /// Label as it appears in the `geography` column.
    pub label: &'static str,
    pub kind: GeographyKind,
    /// 5-digit state+county FIPS code (state only for the aggregate).
    /// Used by map collaborators to join boundary polygons.
    pub fips: &'static str,
}

const fn county(label: &'static str, fips: &'static str) -> GeographyInfo {
    GeographyInfo {
        label,
        kind: GeographyKind::County,
        fips,
    }
}

/// All geographies in domain order. Position in this slice is the
/// geography's ordinal.
pub static GEOGRAPHY_REGISTRY: &[GeographyInfo] = &[
    GeographyInfo {
        label: STATEWIDE_LABEL,
        kind: GeographyKind::Statewide,
        fips: "53",
    },
    county("Adams County", "53001"),
    county("Asotin County", "53003"),
    county("Benton County", "53005"),
    county("Chelan County", "53007"),
    county("Clallam County", "53009"),
    county("Clark County", "53011"),
    county("Columbia County", "53013"),
    county("Cowlitz County", "53015"),
    county("Douglas County", "53017"),
    county("Ferry County", "53019"),
    county("Franklin County", "53021"),
    county("Garfield County", "53023"),
    county("Grant County", "53025"),
    county("Grays Harbor County", "53027"),
    county("Island County", "53029"),
    county("Jefferson County", "53031"),
    county("King County", "53033"),
    county("Kitsap County", "53035"),
    county("Kittitas County", "53037"),
    county("Klickitat County", "53039"),
    county("Lewis County", "53041"),
    county("Lincoln County", "53043"),
    county("Mason County", "53045"),
    county("Okanogan County", "53047"),
    county("Pacific County", "53049"),
    county("Pend Oreille County", "53051"),
    county("Pierce County", "53053"),
    county("San Juan County", "53055"),
    county("Skagit County", "53057"),
    county("Skamania County", "53059"),
    county("Snohomish County", "53061"),
    county("Spokane County", "53063"),
    county("Stevens County", "53065"),
    county("Thurston County", "53067"),
    county("Wahkiakum County", "53069"),
    county("Walla Walla County", "53071"),
    county("Whatcom County", "53073"),
    county("Whitman County", "53075"),
    county("Yakima County", "53077"),
];

// ---------------------------------------------------------------------------
// Geography domain value
// ---------------------------------------------------------------------------

/// A validated member of the geography domain.
///
/// Ordering follows the registry: statewide aggregate first, then counties
/// alphabetically. Serialized as its label and re-validated on load.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Geography(u8);

impl Geography {
    /// Looks up a label, ignoring case and surrounding whitespace.
    pub fn find(label: &str) -> Option<Geography> {
        let wanted = label.trim();
        GEOGRAPHY_REGISTRY
            .iter()
            .position(|g| g.label.eq_ignore_ascii_case(wanted))
            .map(|i| Geography(i as u8))
    }

    /// Like `find`, but an unknown label is a `Validation` error.
    pub fn from_label(label: &str) -> Result<Geography, PipelineError> {
        Geography::find(label).ok_or_else(|| {
            PipelineError::Validation(format!("unknown geography label '{}'", label.trim()))
        })
    }

    pub fn statewide() -> Geography {
        Geography(0)
    }

    pub fn is_statewide(self) -> bool {
        self.info().kind == GeographyKind::Statewide
    }

    pub fn info(self) -> &'static GeographyInfo {
        &GEOGRAPHY_REGISTRY[self.0 as usize]
    }

    pub fn label(self) -> &'static str {
        self.info().label
    }

    pub fn fips(self) -> &'static str {
        self.info().fips
    }

    /// All 40 geographies in domain order.
    pub fn all() -> impl Iterator<Item = Geography> {
        (0..GEOGRAPHY_REGISTRY.len()).map(|i| Geography(i as u8))
    }

    /// The 39 counties, alphabetically.
    pub fn counties() -> impl Iterator<Item = Geography> {
        Geography::all().filter(|g| !g.is_statewide())
    }

    /// Size of the domain.
    pub fn count() -> usize {
        GEOGRAPHY_REGISTRY.len()
    }
}

impl TryFrom<String> for Geography {
    type Error = PipelineError;

    fn try_from(label: String) -> Result<Self, Self::Error> {
        Geography::from_label(&label)
    }
}

impl From<Geography> for String {
    fn from(geography: Geography) -> String {
        geography.label().to_string()
    }
}

impl fmt::Display for Geography {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl fmt::Debug for Geography {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Geography({:?})", self.label())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
