use crate::CoreError;
use pipfleet_schema::OperationState;

/// Scheduled states move to their running state; running states end in
/// `Ok` or `Erred`. A scheduled operation can also fail without running
/// (refused admission, missing unit). Terminal states never change.
pub fn validate_transition(from: OperationState, to: OperationState) -> Result<(), CoreError> {
    use OperationState as S;

    let valid = matches!(
        (from, to),
        (S::Scheduled, S::Executing)
            | (S::CreationScheduled, S::Creating)
            | (S::DeletionScheduled, S::Deleting)
            | (S::Executing | S::Creating | S::Deleting, S::Ok | S::Erred)
            | (
                S::Scheduled | S::CreationScheduled | S::DeletionScheduled,
                S::Erred
            )
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
