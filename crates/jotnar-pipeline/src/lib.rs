//! Pipeline stages (spec §4.5/§4.6 / C5, C6, C8): issue ingestion, the
//! triage workflow, the rebase and backport workflows, and the clone-
//! directory janitor. Each stage is a [`jotnar_workflow::Workflow`] wired to
//! [`jotnar_tools`] and [`jotnar_agent`], consuming from and producing to
//! [`jotnar_queue`].

pub mod backport;
pub mod ingestion;
pub mod janitor;
pub mod rebase;
pub mod triage;
