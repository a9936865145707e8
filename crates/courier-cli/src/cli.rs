//! Command-line interface definition

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "courier", about = "Multi-session outbound dispatch engine")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a self-contained dispatch demo against the in-memory driver
    Demo {
        /// Number of tenants to provision
        #[arg(long, default_value_t = 2)]
        tenants: u16,

        /// Slots per tenant
        #[arg(long, default_value_t = 3)]
        slots: u16,

        /// Recipients distributed per tenant
        #[arg(long, default_value_t = 10)]
        recipients: usize,

        /// Delay between sends within a batch, in milliseconds
        #[arg(long, default_value_t = 200)]
        base_delay_ms: u64,

        /// Assignments drained per tick
        #[arg(long, default_value_t = 5)]
        batch_size: usize,

        /// Also trigger an immediate burst for the first recipient
        #[arg(long)]
        immediate: bool,
    },
}
