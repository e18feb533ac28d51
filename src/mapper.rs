//! Field Mapper
//!
//! Projects parsed rows onto the target schema using a [`FieldMapping`].

use tracing::debug;

use crate::mapping::FieldMapping;
use crate::models::{Contact, RawTable, TargetField};

/// Project every row of `table` into a contact. Rows whose fullName or email
/// resolve to an empty value are dropped; output keeps input row order.
pub fn project(table: &RawTable, mapping: &FieldMapping) -> Vec<Contact> {
    // A mapped header that is absent from the file leaves the field unmapped.
    let columns: Vec<(TargetField, usize)> = mapping
        .iter()
        .filter_map(|(field, header)| table.column_index(header).map(|index| (field, index)))
        .collect();

    let contacts: Vec<Contact> = (0..table.rows.len())
        .filter_map(|row| {
            let mut contact = Contact::default();
            for (field, column) in &columns {
                if let Some(value) = table.cell(row, *column) {
                    contact.set(*field, value.to_string());
                }
            }
            contact.is_identified().then_some(contact)
        })
        .collect();

    debug!(
        rows = table.rows.len(),
        mapped_columns = columns.len(),
        contacts = contacts.len(),
        "Projected rows onto target schema"
    );

    contacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_single_row_scenario() {
        let table = parse("Name,Email Address\nAda Lovelace,ada@x.com");
        let mapping = FieldMapping::new()
            .with(TargetField::FullName, "Name")
            .with(TargetField::Email, "Email Address");

        let contacts = project(&table, &mapping);
        assert_eq!(
            contacts,
            vec![Contact {
                full_name: "Ada Lovelace".to_string(),
                email: "ada@x.com".to_string(),
                ..Default::default()
            }]
        );
    }

    #[test]
    fn test_full_mapping_keeps_every_row() {
        let table = parse(
            "Who,Mail,Job,Org,Score\n\
             Ada,ada@x.com,Analyst,Engines Ltd,9\n\
             Alan,alan@x.com,Cryptographer,Bletchley,8\n\
             Grace,grace@x.com,Admiral,Navy,10",
        );
        let mapping = FieldMapping::new()
            .with(TargetField::FullName, "Who")
            .with(TargetField::Email, "Mail")
            .with(TargetField::Position, "Job")
            .with(TargetField::Company, "Org")
            .with(TargetField::Ranking, "Score");

        let contacts = project(&table, &mapping);
        assert_eq!(contacts.len(), 3);
        assert_eq!(contacts[1].full_name, "Alan");
        assert_eq!(contacts[1].position.as_deref(), Some("Cryptographer"));
        assert_eq!(contacts[2].company.as_deref(), Some("Navy"));
        assert_eq!(contacts[2].ranking.as_deref(), Some("10"));
    }

    #[test]
    fn test_rows_missing_identify_fields_are_dropped() {
        let table = parse(
            "name,email\n\
             Ada,ada@x.com\n\
             ,nobody@x.com\n\
             Alan,\n\
             Grace",
        );
        let mapping = FieldMapping::identity(&["fullName".into(), "email".into()])
            .with(TargetField::FullName, "name");

        let contacts = project(&table, &mapping);
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].full_name, "Ada");
    }

    #[test]
    fn test_identity_mapping_preserves_values() {
        let table = parse(
            "fullName,email,position,company,ranking\n\
             Ada,ada@x.com,Analyst,Engines Ltd,9",
        );
        let contacts = project(&table, &FieldMapping::identity(&table.headers));
        let contact = &contacts[0];
        for (i, field) in TargetField::ALL.iter().enumerate() {
            assert_eq!(contact.get(*field), Some(table.rows[0][i].as_str()));
        }
    }

    #[test]
    fn test_unknown_header_is_unmapped() {
        let table = parse("Name,Email\nAda,ada@x.com");
        let mapping = FieldMapping::new()
            .with(TargetField::FullName, "Name")
            .with(TargetField::Email, "Email")
            .with(TargetField::Company, "Employer");
        let contacts = project(&table, &mapping);
        assert_eq!(contacts[0].company, None);
    }

    #[test]
    fn test_projection_is_idempotent() {
        let table = parse("Name,Email\nAda,ada@x.com\nAlan,alan@x.com");
        let mapping = FieldMapping::new()
            .with(TargetField::FullName, "Name")
            .with(TargetField::Email, "Email");
        assert_eq!(project(&table, &mapping), project(&table, &mapping));
    }

    #[test]
    fn test_empty_mapping_or_table_yields_nothing() {
        let table = parse("Name,Email\nAda,ada@x.com");
        assert!(project(&table, &FieldMapping::new()).is_empty());
        assert!(project(&parse(""), &FieldMapping::identity(&[])).is_empty());
    }
}
