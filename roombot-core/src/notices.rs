// ABOUTME: Fixed chat texts the presence controller posts on admission, approval and eviction.
// ABOUTME: Each notice is plain text with the vote progress and invoker filled in.

/// Onboarding sequence posted right after the bot joins a room
pub fn welcome(
    inviter: Option<&str>,
    approved: bool,
    votes: usize,
    required: usize,
    invoker: &str,
    grace_hours: i64,
) -> Vec<String> {
    let greeting = match inviter {
        Some(name) => format!("Hi! I'm a chat bot, and @{} invited me here.", name),
        None => "Hi! I'm a chat bot, and someone invited me here.".to_string(),
    };

    if approved {
        return vec![
            greeting,
            format!(
                "This room has approved me ({}/{} owner votes). Try `{}help` to see what I can do.",
                votes, required, invoker
            ),
        ];
    }

    vec![
        greeting,
        format!(
            "Before I start answering commands, room owners need to approve me: \
             {}/{} approvals so far. Owners can vote with `{}approve`.",
            votes, required, invoker
        ),
        format!(
            "If I'm not approved within {} hours I'll leave on my own. \
             Owners can also ask me to go at any time with `{}leave`.",
            grace_hours, invoker
        ),
    ]
}

pub fn approved(invoker: &str) -> String {
    format!(
        "Thanks, this room has approved me! Try `{}help` to see what I can do.",
        invoker
    )
}

pub fn reminder(hours_left: i64, votes: usize, required: usize, invoker: &str) -> String {
    let unit = if hours_left == 1 { "hour" } else { "hours" };
    format!(
        "Reminder: I still need owner approval ({}/{} so far) and will leave in {} {}. \
         Owners can vote with `{}approve`.",
        votes, required, hours_left, unit, invoker
    )
}

pub fn expired(grace_hours: i64) -> String {
    format!(
        "Nobody approved me within {} hours, so I'm leaving. Feel free to invite me again.",
        grace_hours
    )
}

pub fn goodbye() -> String {
    "The room owners have voted for me to leave. Goodbye!".to_string()
}

pub fn approve_vote_recorded(votes: usize, required: usize) -> String {
    format!("Approval vote recorded ({}/{}).", votes, required)
}

pub fn leave_vote_recorded(votes: usize, required: usize) -> String {
    format!("Leave vote recorded ({}/{}).", votes, required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welcome_unapproved_lists_progress() {
        let lines = welcome(Some("alice"), false, 0, 2, "!!", 24);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("@alice"));
        assert!(lines[1].contains("0/2"));
        assert!(lines[1].contains("!!approve"));
        assert!(lines[2].contains("24 hours"));
    }

    #[test]
    fn test_welcome_approved_is_short() {
        let lines = welcome(None, true, 1, 1, "!!", 24);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("someone"));
        assert!(lines[1].contains("1/1"));
    }

    #[test]
    fn test_reminder_pluralization() {
        assert!(reminder(1, 0, 1, "!!").contains("1 hour."));
        assert!(reminder(12, 1, 3, "!!").contains("12 hours"));
    }
}
