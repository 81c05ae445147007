pub mod assignments;
pub mod courses;
pub mod documents;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod testutil;
