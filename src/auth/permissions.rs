use anyhow::Error;
use once_cell::sync::Lazy;
use rocket::serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewReferenceData,
    ViewAttendance,
    MarkAttendance,
    DeleteAttendance,

    ManageClasses,
    ManageStudents,
    ManageSubjects,
    ManageSessions,
    RegisterUsers,
    ViewAllTeacherRosters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    #[serde(rename = "TEACHER")]
    Teacher,
    #[serde(rename = "ADMIN")]
    Admin,
}

static TEACHER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewReferenceData);
    permissions.insert(Permission::ViewAttendance);
    permissions.insert(Permission::MarkAttendance);
    permissions.insert(Permission::DeleteAttendance);

    permissions
});

static ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(TEACHER_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ManageClasses);
    permissions.insert(Permission::ManageStudents);
    permissions.insert(Permission::ManageSubjects);
    permissions.insert(Permission::ManageSessions);
    permissions.insert(Permission::RegisterUsers);
    permissions.insert(Permission::ViewAllTeacherRosters);

    permissions
});

impl Role {
    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::Teacher => &TEACHER_PERMISSIONS,
            Role::Admin => &ADMIN_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "TEACHER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "TEACHER" => Ok(Role::Teacher),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
