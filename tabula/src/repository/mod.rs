//! Generic repository over any [`Entity`](crate::entity::Entity)
//!
//! One [`Repository<E>`] type serves every entity. It converts entities to
//! records, validates predicates before anything reaches the backend, runs the
//! persist hook right before writes, and wraps every backend failure with the
//! entity type and predicate involved.
//!
//! # Example
//!
//! ```rust,ignore
//! use tabula::prelude::*;
//!
//! let companies = Repository::<Company>::new(session.clone());
//! let ctx = Context::background();
//!
//! let mut acme = Company::new("acme");
//! companies.create(&ctx, &mut acme).await?;
//!
//! let found = companies.find_one_by(&ctx, predicate!("slug" => "acme")).await?;
//! companies.update_where(&ctx, predicate!("slug" => "acme"), &mut acme).await?;
//! companies.delete_where(&ctx, [("slug", "acme")]).await?;
//! ```

mod error;
mod generic;

pub use error::{RepositoryError, RepositoryErrorKind, RepositoryOperation, RepositoryResult};
pub use generic::Repository;
