mod support;

mod end_to_end;
mod reprocess;
