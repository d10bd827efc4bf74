//! # Heap Diff
//!
//! Partitions every object touched by a window of collections:
//!
//! ```text
//!            start ─────────────────────────▶ end
//! Perm   ●━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━●
//! Died   ●━━━━━━━━━━━━━━━━━━━━✕
//! Born                  ●━━━━━━━━━━━━━━━━━━━━━━━●
//! Temp           ●━━━━━━━━━━━━✕
//! ```
//!
//! For every key path, `before == perm + died` and `after == perm + born`,
//! with Perm keyed as at the start for `before` and as at the end for `after`.

pub mod age;
pub mod evolution;
pub mod pbdt;

pub use age::ObjectAgeCollection;
pub use evolution::HeapEvolution;
pub use pbdt::{DiffRow, Imbalance, Lifetime, PermBornDiedTempGrouping};
