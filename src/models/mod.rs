// Data models for the OpenAI-compatible wire format

pub mod openai;
