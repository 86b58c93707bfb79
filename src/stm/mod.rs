//! Software transactional memory.
//!
//! A [`Stm`] value describes reads and writes on [`TRef`]s. Committing it
//! runs the description against a private [`Journal`] and publishes the
//! journal atomically if no ref it touched was changed in the meantime;
//! otherwise the attempt starts over. [`Stm::retry`] suspends the fiber
//! until a ref the attempt read is changed by someone else.
//!
//! ```ignore
//! let from = TRef::new(100u64);
//! let to = TRef::new(0u64);
//! let transfer: Stm<()> = from
//!     .get()
//!     .flat_map(move |balance| Stm::check(balance >= 30).and_then(from.set(balance - 30)))
//!     .and_then(to.update(|b| b + 30));
//! runtime.run_sync(transfer.commit())?;
//! ```
//!
//! Built on refs: [`TArray`], [`TMap`], [`TSet`], [`TQueue`], [`TSemaphore`].

mod journal;
#[allow(clippy::module_inception)]
mod stm;
mod tarray;
mod tmap;
mod tqueue;
mod tref;
mod tsemaphore;
mod tset;

pub use journal::Journal;
pub use stm::Stm;
pub use tarray::TArray;
pub use tmap::TMap;
pub use tqueue::TQueue;
pub use tref::{TRef, TRefId};
pub use tsemaphore::TSemaphore;
pub use tset::TSet;
