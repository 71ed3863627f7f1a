// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Database schema for retention metadata.
//!
//! File records are immutable once inserted (apart from the vault key): a
//! change of observed facts is a delete-and-reinsert, cascading away the
//! old statuses. The composite foreign key from `warnings` into `status`
//! enforces that only `warned` statuses can carry a warning checkpoint.

/// Core schema SQL (groups, files, statuses, warnings, notifications)
pub const SCHEMA_SQL: &str = r#"
create table if not exists groups (
    gid integer primary key not null
);

create table if not exists group_owners (
    gid   integer not null,
    owner integer not null,
    primary key (gid, owner),
    foreign key (gid) references groups(gid) on delete cascade
);

create table if not exists files (
    id       integer primary key autoincrement not null,
    device   integer not null,
    inode    integer not null,
    path     blob not null,
    key      blob,
    mtime    integer not null,
    owner    integer not null,
    group_id integer not null,
    size     integer not null check (size >= 0),
    unique (device, inode),
    foreign key (group_id) references groups(gid)
);

create table if not exists status (
    id        integer primary key autoincrement not null,
    file      integer not null,
    state     text not null check (state in ('deleted', 'staged', 'warned')),
    timestamp integer not null,
    unique (id, state),
    foreign key (file) references files(id) on delete cascade
);

create index if not exists IndexStatusFile on status(file);

create table if not exists warnings (
    status integer primary key not null,
    state  text not null default 'warned' check (state = 'warned'),
    tminus integer not null,
    foreign key (status) references status(id) on delete cascade,
    foreign key (status, state) references status(id, state)
);

create table if not exists notifications (
    status      integer not null,
    stakeholder integer not null,
    primary key (status, stakeholder),
    foreign key (status) references status(id) on delete cascade
);
"#;

/// Stakeholder views over the core tables
pub const VIEW_SQL: &str = r#"
create view if not exists file_stakeholders as
    select files.id    as file,
           files.owner as stakeholder
    from   files
    union
    select files.id,
           group_owners.owner
    from   files
    join   group_owners
    on     group_owners.gid = files.group_id;

create view if not exists stakeholder_notified as
    select status.id        as id,
           status.file      as file,
           status.state     as state,
           status.timestamp as timestamp,
           fs.stakeholder   as stakeholder,
           notifications.stakeholder is not null as notified
    from   status
    join   file_stakeholders fs
    on     fs.file = status.file
    left join notifications
    on     notifications.status      = status.id
    and    notifications.stakeholder = fs.stakeholder;

create view if not exists stakeholders as
    select distinct stakeholder
    from   stakeholder_notified
    where  not notified;
"#;

/// Schema version
pub const SCHEMA_VERSION: i32 = 1;
