mod common;

mod build_tests;
mod cache_tests;
mod launch_tests;
mod plan_tests;
