// Summarizes text files with a BART sequence-to-sequence model running on the CPU.

pub mod config;
pub mod common;
pub mod attention;
pub mod mlp;
pub mod model;
pub mod model_loader;
pub mod tokenizer;
pub mod hub;
pub mod beam_search;
pub mod summarizer;
pub mod file_io;
pub mod system_resources;
pub mod runtime_interface;

#[cfg(test)]
pub(crate) mod test_support;
