//! Conversion between queue-layer and AMQP message properties.

use std::collections::HashMap;

use amqprs::{BasicProperties, FieldTable, FieldValue, ShortStr};

use tasklane_queue::{BrokerError, MessageProperties};
use tasklane_queue::transport::PERSISTENT_DELIVERY_MODE;

pub(crate) fn to_basic_properties(props: &MessageProperties) -> Result<BasicProperties, BrokerError> {
    let mut basic = BasicProperties::default();

    if props.persistent {
        basic.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
    }
    if let Some(priority) = props.priority {
        basic.with_priority(priority);
    }
    if let Some(content_type) = &props.content_type {
        basic.with_content_type(content_type);
    }
    if let Some(message_id) = &props.message_id {
        basic.with_message_id(message_id);
    }

    if !props.headers.is_empty() {
        let mut table = FieldTable::new();
        for (key, value) in &props.headers {
            let key = ShortStr::try_from(key.as_str())
                .map_err(|e| BrokerError::publish(format!("header {key}: {e}")))?;
            table.insert(key, value.clone().into());
        }
        basic.with_headers(table);
    }

    Ok(basic.finish())
}

/// String-valued headers are kept; other header types are not used by this system.
pub(crate) fn from_basic_properties(basic: &BasicProperties) -> MessageProperties {
    let mut props = MessageProperties {
        persistent: basic.delivery_mode().map(|m| m.to_owned()) == Some(PERSISTENT_DELIVERY_MODE),
        priority: basic.priority().map(|p| p.to_owned()),
        content_type: basic.content_type().map(|s| s.to_string()),
        message_id: basic.message_id().map(|s| s.to_string()),
        ..MessageProperties::default()
    };

    if let Some(table) = basic.headers() {
        let entries: &HashMap<ShortStr, FieldValue> = table.as_ref();
        for (key, value) in entries {
            if let FieldValue::S(text) = value {
                props.headers.insert(key.to_string(), text.to_string());
            }
        }
    }
    props
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_properties_survive_conversion() {
        let props = MessageProperties::persistent()
            .with_priority(9)
            .with_content_type("application/json")
            .with_message_id("req_abc")
            .with_header("x-original-queue", "ai-processing");

        let basic = to_basic_properties(&props).unwrap();
        assert_eq!(basic.delivery_mode().map(|m| m.to_owned()), Some(2));
        assert_eq!(from_basic_properties(&basic), props);
    }

    #[test]
    fn transient_message_has_no_delivery_mode() {
        let basic = to_basic_properties(&MessageProperties::default()).unwrap();
        assert!(basic.delivery_mode().is_none());
        assert!(!from_basic_properties(&basic).persistent);
    }
}
