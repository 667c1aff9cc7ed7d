#[path = "integration/fixtures/mod.rs"]
mod fixtures;

#[path = "integration/submit.rs"]
mod submit;
#[path = "integration/outputs.rs"]
mod outputs;
#[path = "integration/control.rs"]
mod control;
#[path = "integration/manage.rs"]
mod manage;
#[path = "integration/recovery.rs"]
mod recovery;
