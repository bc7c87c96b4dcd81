use thiserror::Error;

/// Why a project record has no usable `extras.sort_index`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SortKeyProblem {
    #[error("record has no `extras` object")]
    MissingExtras,
    #[error("`extras` has no `sort_index` field")]
    MissingSortIndex,
    #[error("`extras.sort_index` is null")]
    NullSortIndex,
    #[error("`extras.sort_index` is a {0}, expected a number or string")]
    UnsupportedType(&'static str),
}
