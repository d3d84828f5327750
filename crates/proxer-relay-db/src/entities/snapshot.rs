//! A single table holding the gateway's periodic persistence snapshot.
//!
//! The core only needs `load() / save(bytes)` (spec §4.5 "persistence
//! binary format ... only the interface matters"); one row is kept, keyed
//! by a constant id, and each save overwrites it.

use sea_orm::entity::prelude::*;

pub const SINGLETON_ID: i32 = 1;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "snapshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,
    pub payload: Vec<u8>,
    pub saved_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
