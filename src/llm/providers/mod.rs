pub mod openai_compatible;

#[cfg(test)]
pub mod scripted;
