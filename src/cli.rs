// Copyright 2026 Evidex Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(
    name = "evidex",
    version,
    about = "Submit evidence to a detection service and review what it found"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new evidence store
    Init {
        /// Directory to create the store in
        path: Option<PathBuf>,
    },

    /// Run a detection batch and commit it
    Submit(SubmitArgs),

    /// Commit a saved JSON array of results as the current batch
    Import(ImportArgs),

    /// List significant results
    Results(ResultsArgs),

    /// List subcategory facets of the significant results
    Facets(FacetsArgs),

    /// Write the visible results and their images to disk
    Export(ExportArgs),

    /// Show the committed batch
    Stats {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// List the detection categories
    Categories {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a shell completion script
    Completions {
        shell: Shell,
    },
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Files or directories to submit
    pub paths: Vec<PathBuf>,

    /// Detection category (repeatable)
    #[arg(short = 'c', long = "category")]
    pub categories: Vec<String>,

    /// Glob to include
    #[arg(long)]
    pub glob: Option<String>,

    /// Ignore globs
    #[arg(long)]
    pub ignore: Vec<String>,

    /// Detection service URL (overrides config)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// JSON file holding an array of result records
    pub path: PathBuf,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ViewArgs {
    /// Case-insensitive text to match
    #[arg(long, short = 'q', default_value = "")]
    pub query: String,

    /// Facet to narrow by (repeatable; all must be present)
    #[arg(long = "facet")]
    pub facets: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ResultsArgs {
    #[command(flatten)]
    pub view: ViewArgs,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct FacetsArgs {
    /// Case-insensitive text to match
    #[arg(long, short = 'q', default_value = "")]
    pub query: String,

    /// Only show the facets of this category
    #[arg(long)]
    pub category: Option<String>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Destination directory; `results/` is created inside it
    #[arg(long)]
    pub out: PathBuf,

    #[command(flatten)]
    pub view: ViewArgs,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}
