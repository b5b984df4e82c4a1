mod build_tests;
mod common;
mod image_tests;
mod plan_tests;
