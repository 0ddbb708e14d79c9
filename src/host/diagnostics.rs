//! Built-in diagnostics module.
//!
//! Registered by the bundled `harness-host` binary under
//! [`DIAGNOSTICS_ARTIFACT`] so a freshly launched host can be exercised
//! end-to-end without loading external test code.  The cases double as a
//! live check of the isolation guarantee: two of them mutate the same
//! document and each asserts it starts from a clean state.

use crate::host::module::{StaticModule, TestCase, TestFailure, TestParam};
use crate::host::resources::ModelRef;

/// Artifact key the diagnostics module is registered under.
pub const DIAGNOSTICS_ARTIFACT: &str = "builtin:diagnostics";

/// Model identifier shared by the diagnostics cases.
const DIAGNOSTICS_MODEL: &str = "harness-diagnostics.model";

/// Build the diagnostics module.
#[must_use]
pub fn module() -> StaticModule {
    let model = ModelRef::local(DIAGNOSTICS_MODEL);

    let document_opens = TestCase::new("diagnostics::document_opens", |input| {
        let doc = input
            .document
            .ok_or_else(|| TestFailure::new("no document was injected"))?;
        if input.host.is_valid(doc) {
            Ok(())
        } else {
            Err(TestFailure::new("injected document reports itself invalid"))
        }
    })
    .with_model(model.clone())
    .with_params(vec![TestParam::Host, TestParam::Document]);

    let mutation_rolls_back = TestCase::new("diagnostics::mutation_rolls_back", mutate_clean_doc)
        .with_model(model.clone())
        .with_params(vec![TestParam::Host, TestParam::Document]);

    // Identical body on purpose: if the previous case's mutations were
    // not rolled back, the clean-state assertion here fails.
    let second_mutation =
        TestCase::new("diagnostics::second_mutation_sees_clean_state", mutate_clean_doc)
            .with_model(model)
            .with_params(vec![TestParam::Host, TestParam::Document]);

    StaticModule::new(
        "diagnostics",
        vec![document_opens, mutation_rolls_back, second_mutation],
    )
}

/// Assert the document starts empty, then mutate it.
fn mutate_clean_doc(
    input: &mut crate::host::module::TestInput<'_>,
) -> std::result::Result<(), TestFailure> {
    let doc = input
        .document
        .ok_or_else(|| TestFailure::new("no document was injected"))?;

    let before = input.host.element_count(doc)?;
    if before != 0 {
        return Err(TestFailure::new(format!(
            "document not clean at test start: {before} element(s) present"
        )));
    }

    input.host.insert_element(doc, "diagnostics-probe")?;

    let after = input.host.element_count(doc)?;
    if after == before + 1 {
        Ok(())
    } else {
        Err(TestFailure::new(format!(
            "mutation not visible inside the group: {after} element(s) after insert"
        )))
    }
}
