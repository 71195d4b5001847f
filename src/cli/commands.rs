use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about = "Chat with OpenAI-compatible models and keep a searchable history", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a single message in a new conversation
    Chat {
        prompt: String,

        /// Model to use for this and later requests
        #[arg(short = 'm', long)]
        model: Option<String>,
    },

    /// Start an interactive chat session
    Interactive {
        /// Resume a saved conversation by id
        #[arg(short = 's', long)]
        session: Option<String>,
    },

    /// List saved conversations, most recent first
    History,

    /// Print a saved conversation
    Show { id: String },

    /// Rename a saved conversation
    Rename { id: String, title: String },

    /// Delete a saved conversation
    Delete { id: String },

    /// Copy a saved conversation under a new id
    Duplicate { id: String },

    /// Ask the model for a fresh title for a saved conversation
    Retitle { id: String },

    /// List the models the API offers
    Models,

    /// Update stored preferences
    Set {
        /// API key; pass an empty string to remove it
        #[arg(long)]
        api_key: Option<String>,

        #[arg(short, long)]
        temperature: Option<f32>,

        #[arg(short = 's', long)]
        system_prompt: Option<String>,

        #[arg(short = 'm', long)]
        model: Option<String>,
    },
}
