pub mod init;
pub mod rate_limit;
pub mod test_utils;
