#![doc = include_str!("../README.md")]

extern crate bitcoin;

pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod trade;
pub mod tx;
pub mod utill;
pub mod watch;
