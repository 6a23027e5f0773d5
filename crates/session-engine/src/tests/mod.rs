
mod refresh_tests;
mod scheduler_tests;
