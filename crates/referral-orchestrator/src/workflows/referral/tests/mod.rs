mod callbacks;
mod common;
