use clap::{Parser, Subcommand};

/// Default number of jobs shown by `peek` and `dlq`.
const DEFAULT_PEEK_COUNT: usize = 10;

#[derive(Debug, Parser)]
#[command(name = "ikon-queue")]
#[command(about = "Inspect and operate the IKON job queues")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand, PartialEq)]
pub enum Commands {
    /// Show the length of every known queue
    Stats,

    /// Show the length of one queue
    Length {
        /// Queue name without namespace, e.g. ideas:ready
        queue: String,
    },

    /// Print the most recently enqueued jobs without removing them
    Peek {
        queue: String,

        #[arg(short = 'n', long, default_value_t = DEFAULT_PEEK_COUNT)]
        count: usize,
    },

    /// Print jobs from the dead letter queue
    Dlq {
        #[arg(short = 'n', long, default_value_t = DEFAULT_PEEK_COUNT)]
        count: usize,
    },

    /// Delete a queue and every job in it
    Clear {
        queue: String,

        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Enqueue a new job
    Enqueue {
        queue: String,

        #[arg(long)]
        idea_id: String,

        /// Job payload as a JSON object
        #[arg(long, default_value = "{}")]
        payload: String,

        #[arg(long)]
        dedupe_key: Option<String>,

        /// Override QUEUE_MAX_ATTEMPTS for this job (at least 1)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_attempts: Option<u32>,
    },

    /// Ping the broker; exits non-zero when unreachable
    Health,

    /// Run the health and admin HTTP server
    Serve {
        /// Overrides HEALTH_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },
}
