mod lifecycle;
mod runner;
