//! Plain-text bodies for reservation emails.

/// A subject line and body ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

/// The item a guest or user reserved is no longer available.
pub fn reservation_removed(item_name: &str, list_title: &str, base_url: &str) -> RenderedEmail {
    RenderedEmail {
        subject: format!("Your reservation for \"{item_name}\" was removed"),
        body: format!(
            "Hello,\n\n\
             The gift \"{item_name}\" you reserved on the wish list \"{list_title}\" \
             is no longer available, so your reservation has been removed.\n\n\
             You can pick another gift at {base_url}.\n"
        ),
    }
}

/// The owner marked a reserved gift as purchased.
pub fn purchase_confirmation(
    item_name: &str,
    list_title: &str,
    guest_name: Option<&str>,
    base_url: &str,
) -> RenderedEmail {
    let greeting = match guest_name {
        Some(name) => format!("Hello {name},"),
        None => "Hello,".to_string(),
    };
    RenderedEmail {
        subject: format!("\"{item_name}\" has been marked as purchased"),
        body: format!(
            "{greeting}\n\n\
             The gift \"{item_name}\" you reserved on the wish list \"{list_title}\" \
             has been marked as purchased. Thank you!\n\n\
             {base_url}\n"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_email_names_item_and_list() {
        let email = reservation_removed("Teapot", "Birthday", "https://gifts.example.com");
        assert!(email.subject.contains("Teapot"));
        assert!(email.body.contains("\"Birthday\""));
        assert!(email.body.contains("https://gifts.example.com"));
    }

    #[test]
    fn purchase_email_greets_guest_by_name() {
        let email = purchase_confirmation("Teapot", "Birthday", Some("Ann"), "http://x");
        assert!(email.body.starts_with("Hello Ann,"));

        let email = purchase_confirmation("Teapot", "Birthday", None, "http://x");
        assert!(email.body.starts_with("Hello,\n"));
    }
}
