/// End-to-end tests of the `pgtestdb` binary, driven through assert_cmd
pub mod commands;
