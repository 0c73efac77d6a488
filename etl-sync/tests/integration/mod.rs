mod loader_test;
mod merge_test;
mod schema_evolution_test;
mod tracker_test;
