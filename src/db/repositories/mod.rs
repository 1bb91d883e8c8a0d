mod epochs;
