//! The listing engine: filter compilation, ordering, grouping, pagination
//! and annotation.
//!
//! Nothing in here touches the database directly. The store plugs in
//! through [`paginate::ItemSource`] and [`group::GroupDomain`], and an
//! in-memory [`paginate::MemorySource`] answers the same queries over a
//! snapshot.

pub mod annotate;
pub mod cursor;
pub mod filter;
pub mod group;
pub mod order;
pub mod paginate;
pub mod predicate;

pub use annotate::{Annotations, annotate};
pub use cursor::{Direction, OffsetCursor, SyncCursor};
pub use filter::{FilterCompiler, FilterMode, FilterParams, compile};
pub use group::{
    Group, GroupDomain, GroupKey, GroupSpec, Groups, NONE_GROUP, group, validate_group_specs,
};
pub use order::{DEFAULT_ORDER_BY, OrderSpec, SortKey, resolve};
pub use paginate::{
    DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE, GroupPage, GroupedQuery, ItemSource, MemorySource,
    Page, PageResults, SubGroupPage, clamp_page_size, offset_cursor, paginate_flat,
    paginate_grouped, paginate_sync,
};
pub use predicate::{Field, Predicate, Value};

/// The condition every per-group total also applies: not archived and not a
/// draft.
#[must_use]
pub fn count_filter() -> Predicate {
    Predicate::and([
        Predicate::is_null(Field::ArchivedAt),
        Predicate::equals(Field::IsDraft, Value::Bool(false)),
    ])
}
