pub mod decoder;
pub mod metadata;
pub mod nodes;
pub mod opcodes;

#[cfg(test)]
mod tests;
