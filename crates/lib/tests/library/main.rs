mod common;
mod pipeline_tests;
mod provisioning_tests;
