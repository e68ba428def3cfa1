mod common;

mod form;
mod pipeline;
