//! Built-in descriptors for the network, compute and database types.
//!
//! Each row is `(type, id prefix, updatable attributes, exported attributes)`.
//! Attributes missing from the updatable list force a replacement.

/// A row of the built-in capability table.
pub(super) type BuiltinRow = (&'static str, &'static str, &'static [&'static str], &'static [&'static str]);

pub(super) const BUILTIN_TYPES: &[BuiltinRow] = &[
    (
        "aws_vpc",
        "vpc",
        &["tags", "enable_dns_support", "enable_dns_hostnames"],
        &["id", "arn", "default_route_table_id", "main_route_table_id", "owner_id"],
    ),
    (
        "aws_subnet",
        "subnet",
        &["tags", "map_public_ip_on_launch"],
        &["id", "arn", "owner_id"],
    ),
    (
        "aws_internet_gateway",
        "igw",
        &["tags", "vpc_id"],
        &["id", "arn", "owner_id"],
    ),
    (
        "aws_eip",
        "eipalloc",
        &["tags"],
        &["id", "allocation_id", "public_ip", "public_dns"],
    ),
    (
        "aws_nat_gateway",
        "nat",
        &["tags"],
        &["id", "public_ip", "private_ip", "network_interface_id"],
    ),
    (
        "aws_route_table",
        "rtb",
        &["tags", "route", "propagating_vgws"],
        &["id", "arn", "owner_id"],
    ),
    (
        "aws_route_table_association",
        "rtbassoc",
        &["route_table_id"],
        &["id"],
    ),
    (
        "aws_security_group",
        "sg",
        &["tags", "ingress", "egress", "revoke_rules_on_delete"],
        &["id", "arn", "owner_id"],
    ),
    (
        "aws_iam_role",
        "role",
        &["tags", "assume_role_policy", "description", "max_session_duration", "managed_policy_arns"],
        &["id", "arn", "unique_id", "create_date"],
    ),
    (
        "aws_iam_instance_profile",
        "aip",
        &["tags", "role"],
        &["id", "arn", "unique_id"],
    ),
    (
        "aws_instance",
        "i",
        &[
            "tags",
            "instance_type",
            "vpc_security_group_ids",
            "iam_instance_profile",
            "monitoring",
            "disable_api_termination",
        ],
        &["id", "arn", "private_ip", "public_ip", "primary_network_interface_id"],
    ),
    (
        "aws_db_subnet_group",
        "dbsubnet",
        &["tags", "description", "subnet_ids"],
        &["id", "arn"],
    ),
    (
        "aws_db_instance",
        "db",
        &[
            "tags",
            "instance_class",
            "allocated_storage",
            "vpc_security_group_ids",
            "backup_retention_period",
            "multi_az",
            "password",
            "deletion_protection",
            "skip_final_snapshot",
            "apply_immediately",
        ],
        &["id", "arn", "address", "endpoint", "port", "resource_id"],
    ),
];
