pub mod topology;
pub mod topology_parser;
pub mod rule_parser;
pub mod dispatch;
