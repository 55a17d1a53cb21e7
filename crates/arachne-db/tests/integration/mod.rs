pub mod common;

mod broker_tests;
