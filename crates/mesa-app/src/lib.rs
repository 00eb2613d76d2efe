// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod columns;
pub mod cross_ref;
pub mod export;
pub mod format;
pub mod group_by;
pub mod ids;
pub mod manager;
pub mod model;
pub mod pagination;
pub mod selection;
pub mod service;

pub use columns::*;
pub use cross_ref::*;
pub use export::*;
pub use format::*;
pub use group_by::*;
pub use ids::*;
pub use manager::*;
pub use model::*;
pub use pagination::*;
pub use selection::*;
pub use service::*;
