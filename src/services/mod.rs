pub mod cloud_sync;
pub mod connectivity;
pub mod records;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;
