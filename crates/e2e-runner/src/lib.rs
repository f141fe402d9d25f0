//! E2E runner library
//!
//! Runs one of the operator's Go e2e test packages inside a pod of the target
//! cluster and reports the result as the process exit code.

pub mod cluster;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod kubeconfig;
pub mod manifests;
pub mod runner;

pub use error::{Error, Result};

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// E2E - Run operator end-to-end tests in a Kubernetes cluster
#[derive(Parser, Debug)]
#[command(name = "e2e")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a test package in the cluster
    Run(commands::run::RunArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<ExitCode> {
        match self.command {
            Commands::Run(args) => commands::run::run(args).await,
        }
    }
}
