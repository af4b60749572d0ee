pub mod cross_join;
pub mod hash_join;
pub mod merge_join;
