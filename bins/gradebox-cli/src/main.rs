mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gradebox-cli")]
#[command(about = "Gradebox CLI - Seed assignments and grade submissions locally", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an assignment definition into Redis
    Seed {
        /// Path to the assignment JSON file
        #[arg(short, long)]
        file: String,

        /// Redis connection URL
        #[arg(short, long, default_value = "redis://127.0.0.1:6379")]
        redis_url: String,
    },

    /// Run the visible tests of one question against saved answers
    Precheck {
        /// Path to the assignment JSON file
        #[arg(short, long)]
        assignment: String,

        /// Question to check
        #[arg(short, long)]
        question: String,

        /// Path to the answers JSON file (question id -> code)
        #[arg(long)]
        answers: String,

        /// Docker image for the execution session
        #[arg(short, long, default_value = "python:3.11-slim")]
        image: String,

        /// Per-run wall-clock budget in milliseconds
        #[arg(short, long, default_value = "5000")]
        timeout_ms: u64,
    },

    /// Grade every question against all test cases
    Grade {
        /// Path to the assignment JSON file
        #[arg(short, long)]
        assignment: String,

        /// Path to the answers JSON file (question id -> code)
        #[arg(long)]
        answers: String,

        /// First course day, YYYY-MM-DD; used for the deadline check
        #[arg(short, long)]
        course_start: Option<chrono::NaiveDate>,

        /// Docker image for the execution session
        #[arg(short, long, default_value = "python:3.11-slim")]
        image: String,

        /// Per-run wall-clock budget in milliseconds
        #[arg(short, long, default_value = "5000")]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Seed { file, redis_url } => {
            commands::seed(&file, &redis_url).await?;
        }
        Commands::Precheck {
            assignment,
            question,
            answers,
            image,
            timeout_ms,
        } => {
            commands::precheck(&assignment, &question, &answers, &image, timeout_ms).await?;
        }
        Commands::Grade {
            assignment,
            answers,
            course_start,
            image,
            timeout_ms,
        } => {
            commands::grade(&assignment, &answers, course_start, &image, timeout_ms).await?;
        }
    }

    Ok(())
}
