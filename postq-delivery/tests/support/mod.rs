//! Test support for driving delivery over a real socket

pub mod mock_server;
