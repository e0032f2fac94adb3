//! Schema catalog: the declarative description of each aggregate table.
//!
//! One `TableSpec` per aggregate kind, declared once. Summary tables are
//! the ones whose reads use an exclusive lower time bound (so merges from
//! adjacent ranges never double-count a bucket boundary); the rest read
//! inclusively. Query and service-call tables carry extra clustering
//! columns, encoded as a content-hash suffix on the row key.
//!
//! `Catalog` is the prepared-statement registry analogue: the per-level key
//! prefixes for every table, built once at startup and read-only afterwards.

use central_types::AggregateKind;

/// Declarative description of one aggregate table family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub kind: AggregateKind,
    /// Short name used as the leading key segment
    pub partial_name: &'static str,
    /// Summary tables group by transaction type only (name is clustering)
    pub is_summary: bool,
    /// Whether ad-hoc reads include the lower time bound
    pub from_inclusive: bool,
    /// Whether rows carry clustering columns beyond capture time
    pub has_clustering: bool,
}

const TABLES: [TableSpec; 9] = [
    TableSpec {
        kind: AggregateKind::Summary,
        partial_name: "smry",
        is_summary: true,
        from_inclusive: false,
        has_clustering: false,
    },
    TableSpec {
        kind: AggregateKind::ErrorSummary,
        partial_name: "errsmry",
        is_summary: true,
        from_inclusive: false,
        has_clustering: false,
    },
    TableSpec {
        kind: AggregateKind::Overview,
        partial_name: "ovw",
        is_summary: false,
        from_inclusive: true,
        has_clustering: false,
    },
    TableSpec {
        kind: AggregateKind::Histogram,
        partial_name: "hist",
        is_summary: false,
        from_inclusive: true,
        has_clustering: false,
    },
    TableSpec {
        kind: AggregateKind::Throughput,
        partial_name: "tput",
        is_summary: false,
        from_inclusive: true,
        has_clustering: false,
    },
    TableSpec {
        kind: AggregateKind::Query,
        partial_name: "qry",
        is_summary: false,
        from_inclusive: true,
        has_clustering: true,
    },
    TableSpec {
        kind: AggregateKind::ServiceCall,
        partial_name: "svc",
        is_summary: false,
        from_inclusive: true,
        has_clustering: true,
    },
    TableSpec {
        kind: AggregateKind::MainThreadProfile,
        partial_name: "mainprof",
        is_summary: false,
        from_inclusive: true,
        has_clustering: false,
    },
    TableSpec {
        kind: AggregateKind::AuxThreadProfile,
        partial_name: "auxprof",
        is_summary: false,
        from_inclusive: true,
        has_clustering: false,
    },
];

/// Look up the spec for a kind.
pub fn table_spec(kind: AggregateKind) -> &'static TableSpec {
    TABLES
        .iter()
        .find(|spec| spec.kind == kind)
        .expect("every kind is declared")
}

/// Per-level key prefixes for every table, built once at open.
#[derive(Debug)]
pub struct Catalog {
    level_count: usize,
    /// `prefixes[level][kind as index]` = "{partial}:{level}"
    prefixes: Vec<Vec<String>>,
}

impl Catalog {
    pub fn new(level_count: usize) -> Self {
        let prefixes = (0..level_count)
            .map(|level| {
                TABLES
                    .iter()
                    .map(|spec| format!("{}:{}", spec.partial_name, level))
                    .collect()
            })
            .collect();
        Self {
            level_count,
            prefixes,
        }
    }

    pub fn level_count(&self) -> usize {
        self.level_count
    }

    /// The fixed "{partial}:{level}" prefix for a table at a level.
    pub fn table_prefix(&self, kind: AggregateKind, level: usize) -> Option<&str> {
        let kind_index = TABLES.iter().position(|spec| spec.kind == kind)?;
        self.prefixes
            .get(level)
            .map(|by_kind| by_kind[kind_index].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_declared() {
        for kind in AggregateKind::ALL {
            let spec = table_spec(kind);
            assert_eq!(spec.kind, kind);
        }
    }

    #[test]
    fn test_summary_tables_are_exclusive() {
        for kind in AggregateKind::ALL {
            let spec = table_spec(kind);
            assert_eq!(spec.is_summary, !spec.from_inclusive);
        }
    }

    #[test]
    fn test_partial_names_unique() {
        let mut names: Vec<_> = TABLES.iter().map(|spec| spec.partial_name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), TABLES.len());
    }

    #[test]
    fn test_catalog_prefixes() {
        let catalog = Catalog::new(4);
        assert_eq!(
            catalog.table_prefix(AggregateKind::Summary, 0),
            Some("smry:0")
        );
        assert_eq!(
            catalog.table_prefix(AggregateKind::Query, 3),
            Some("qry:3")
        );
        assert_eq!(catalog.table_prefix(AggregateKind::Query, 4), None);
    }
}
