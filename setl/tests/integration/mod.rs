#![cfg(feature = "test-utils")]

mod controller;
mod gate;
